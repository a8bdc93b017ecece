use image::Rgba;
use serde::{Deserialize, Serialize};

/// Light/dark flag pushed in by the host. The engine never observes global UI state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Colors consulted when generating background patterns and default ink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    /// Solid fill behind everything.
    pub paper: Rgba<u8>,
    /// Ruling lines and dots.
    pub rule: Rgba<u8>,
    /// Default pen color.
    pub ink: Rgba<u8>,
}

impl Theme {
    pub fn from_dark_flag(dark: bool) -> Self {
        if dark { Theme::Dark } else { Theme::Light }
    }

    pub fn is_dark(self) -> bool {
        self == Theme::Dark
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Light => Palette {
                paper: Rgba([255, 255, 255, 255]),
                rule: Rgba([214, 220, 229, 255]),
                ink: Rgba([17, 24, 39, 255]),
            },
            Theme::Dark => Palette {
                paper: Rgba([30, 30, 34, 255]),
                rule: Rgba([64, 68, 78, 255]),
                ink: Rgba([240, 240, 240, 255]),
            },
        }
    }
}
