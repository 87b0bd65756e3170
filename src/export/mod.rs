//! Export utilities that sit beside the feed

pub mod print;

pub use print::{compute_placement, print_to_file, write_pdf, PageGeometry, PagePreset, PrintJob, ScaleMode, MAX_PRINT_SIZE};
