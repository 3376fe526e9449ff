//! CPU-side texture types.
//!
//! Provides [`Image`] for holding a decoded mip chain, [`TextureBox`] for
//! addressing one region of it, and the [`TextureKind`] / [`Extent3d`]
//! shapes shared between CPU and GPU code.

mod image;
mod texture_box;

pub use image::{Image, ROW_ALIGNMENT};
pub use texture_box::TextureBox;

use serde::{Deserialize, Serialize};

/// Shape of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TextureKind {
    /// Not decided yet (metadata not loaded).
    #[default]
    Unknown = 0,
    Type1D = 1,
    Type1DArray = 2,
    Type2D = 3,
    Type2DArray = 4,
    TypeCube = 5,
    TypeCubeArray = 6,
    Type3D = 7,
}

impl TextureKind {
    /// Look a kind up by its stable numeric id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Unknown),
            1 => Some(Self::Type1D),
            2 => Some(Self::Type1DArray),
            3 => Some(Self::Type2D),
            4 => Some(Self::Type2DArray),
            5 => Some(Self::TypeCube),
            6 => Some(Self::TypeCubeArray),
            7 => Some(Self::Type3D),
            _ => None,
        }
    }

    /// Returns true for cubemaps and cubemap arrays.
    pub fn is_cube(self) -> bool {
        matches!(self, Self::TypeCube | Self::TypeCubeArray)
    }

    /// Returns true if the third dimension is array slices rather than depth.
    pub fn has_slices(self) -> bool {
        !matches!(self, Self::Type3D)
    }
}

/// 3D extent (width, height, depth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels, or number of array layers.
    pub depth_or_array_layers: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
        }
    }

    /// Create a new 3D extent.
    pub const fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: depth,
        }
    }
}

impl Default for Extent3d {
    fn default() -> Self {
        Self::new_2d(1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids() {
        for id in 0..8 {
            let kind = TextureKind::from_id(id).unwrap();
            assert_eq!(kind as u8, id);
        }
        assert_eq!(TextureKind::from_id(8), None);
    }

    #[test]
    fn test_kind_predicates() {
        assert!(TextureKind::TypeCube.is_cube());
        assert!(!TextureKind::Type2DArray.is_cube());
        assert!(!TextureKind::Type3D.has_slices());
        assert!(TextureKind::TypeCubeArray.has_slices());
    }
}
