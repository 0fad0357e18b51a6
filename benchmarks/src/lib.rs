//! Fixtures shared by the Hercules benchmarks

use hercules_core::{Method, MethodRegistry};

/// Registry with `width` synthetic methods `m0..m{width-1}`
pub fn synthetic_registry(width: usize) -> MethodRegistry {
    let methods = (0..width as u32)
        .map(|bit| Method::new(&format!("m{}", bit), &format!("Method {}", bit), bit, bit % 2 == 0))
        .collect();
    MethodRegistry::new(methods).expect("synthetic registry is dense")
}
