//! Application configuration.

use ash::vk;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Preferred present mode; FIFO is substituted when the device does not
    /// report it.
    pub present_mode: vk::PresentModeKHR,
    /// Number of frame-sync slots. One means the CPU waits out each frame
    /// before recording the next.
    pub frames_in_flight: usize,
    /// Clear color for the default render target.
    pub clear_color: [f32; 4],
    /// Attach a depth buffer to the default render target.
    pub depth: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Hearth".to_string(),
            width: 1280,
            height: 720,
            present_mode: vk::PresentModeKHR::FIFO,
            frames_in_flight: 1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth: false,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the preferred present mode.
    pub fn with_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the number of frame-sync slots.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Enable or disable the depth buffer.
    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}
