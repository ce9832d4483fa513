// Application layer - Use case interactors

pub mod export_interactor;

pub use export_interactor::{export_clip, ExportInteractor};
