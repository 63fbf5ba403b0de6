mod window;

pub use window::{FancyWindow, GuiError};
