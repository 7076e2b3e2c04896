pub mod bread;

pub use bread::bread_routes;
