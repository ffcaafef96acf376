//! Class names and RGB colours used to turn predicted class ids into masks.
//!
//! Index `i` of a [`LabelSet`] names class `i` and paints it with
//! `colormap[i]`. Background is always class 0 and always black.

use candle_core::Tensor;

use crate::error::{Error, Result};

pub type Rgb = [u8; 3];

pub const VOC_LABELS: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

pub const VOC_COLORMAP: [Rgb; 21] = [
    [0, 0, 0],
    [128, 0, 0],
    [0, 128, 0],
    [128, 128, 0],
    [0, 0, 128],
    [128, 0, 128],
    [0, 128, 128],
    [128, 128, 128],
    [64, 0, 0],
    [192, 0, 0],
    [64, 128, 0],
    [192, 128, 0],
    [64, 0, 128],
    [192, 0, 128],
    [64, 128, 128],
    [192, 128, 128],
    [0, 64, 0],
    [128, 64, 0],
    [0, 192, 0],
    [128, 192, 0],
    [0, 64, 128],
];

pub const BINARY_LABELS: [&str; 2] = ["background", "foreground"];

pub const BINARY_COLORMAP: [Rgb; 2] = [[0, 0, 0], [255, 255, 255]];

/// A label scheme: names and colours, index for index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSet {
    pub name: &'static str,
    pub labels: &'static [&'static str],
    pub colormap: &'static [Rgb],
}

/// Pascal VOC segmentation classes.
pub static VOC: LabelSet = LabelSet {
    name: "voc",
    labels: &VOC_LABELS,
    colormap: &VOC_COLORMAP,
};

pub static BINARY: LabelSet = LabelSet {
    name: "binary",
    labels: &BINARY_LABELS,
    colormap: &BINARY_COLORMAP,
};

impl LabelSet {
    pub fn by_name(name: &str) -> Option<&'static LabelSet> {
        [&VOC, &BINARY].into_iter().find(|set| set.name == name)
    }

    /// The built-in scheme with exactly `num_classes` classes.
    pub fn for_classes(num_classes: usize) -> Option<&'static LabelSet> {
        [&VOC, &BINARY]
            .into_iter()
            .find(|set| set.len() == num_classes)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class: usize) -> Option<&'static str> {
        self.labels.get(class).copied()
    }

    pub fn color(&self, class: usize) -> Option<Rgb> {
        self.colormap.get(class).copied()
    }

    pub fn class_of_color(&self, rgb: Rgb) -> Option<usize> {
        self.colormap.iter().position(|&c| c == rgb)
    }

    pub fn class_of_label(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }

    pub fn decode_mask(&self, classes: &[u32]) -> Result<Vec<Rgb>> {
        classes
            .iter()
            .map(|&class| {
                self.color(class as usize).ok_or(Error::UnknownClass {
                    class,
                    len: self.len(),
                })
            })
            .collect()
    }

    /// Paints a tensor of class ids, e.g. the output of
    /// [`Network::predict`](crate::Network::predict), as `u8` RGB with a
    /// trailing channel axis.
    pub fn colorize(&self, classes: &Tensor) -> Result<Tensor> {
        let ids = classes.flatten_all()?.to_vec1::<u32>()?;
        let rgb: Vec<u8> = self.decode_mask(&ids)?.into_iter().flatten().collect();
        let mut dims = classes.dims().to_vec();
        dims.push(3);
        Ok(Tensor::from_vec(rgb, dims, classes.device())?)
    }
}
