//! Presentation of compiled trials: the self-contained browser artifact and
//! the software canvas used by the native window.

pub mod canvas;
pub mod color;
pub mod error;
pub mod html;
pub mod markup;
pub mod text;

pub use canvas::{Screen, StimulusCanvas};
pub use color::parse_color;
pub use error::RenderError;
pub use html::{
    ARTIFACT_FILE, ArtifactSettings, BrowserPayload, BrowserResponse, BrowserTrial, render_document,
    write_artifact,
};
pub use text::{TextStyle, find_system_font, load_font, render_text_pixmap};
