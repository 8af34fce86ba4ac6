use crate::PixelRect;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Detection Error: {0}")]
    Detection(String),

    #[error("Invalid Config: {0}")]
    InvalidConfig(String),

    #[error("Crop {rect:?} falls outside the {width}x{height} buffer")]
    CropOutOfBounds {
        rect: PixelRect,
        width: u32,
        height: u32,
    },

    #[error("Crop rectangle {0:?} has no area")]
    EmptyCrop(PixelRect),

    #[error("Quad corners don't define a perspective transform")]
    DegenerateQuad,

    #[error("Buffer for frame {0} is no longer available")]
    StaleBuffer(u64),

    #[error("Worker Error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
