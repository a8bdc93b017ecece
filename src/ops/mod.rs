pub mod canvas_ops;
pub mod pattern;
pub mod shapes;
