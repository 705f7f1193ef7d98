//! Artifact Renderer: project content to a downloadable document.

pub mod docx;

pub use docx::DocxRenderer;

use crate::project::Project;

#[derive(Debug, Clone)]
pub struct Rendered {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait Renderer: Send + Sync {
    fn render(&self, project: &Project) -> anyhow::Result<Rendered>;
}
