//! Reading and writing images and deformation fields.

mod deformation_io;
mod image_io;

pub use deformation_io::{load_deformation, save_deformation};
pub use image_io::{load_image, load_raw, save_image, save_png, save_raw, save_tiff};
