//! Shared fixtures for unit tests.

use chrono::Utc;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use ndarray::{Array1, Array2};

use crate::db::ScanStore;
use crate::models::{Assessor, Condition, Scan, ScanUpdate};
use crate::pipeline::classifier::{Classifier, LabelMapping, TrainingSet};
use crate::pipeline::preprocess::InputSpec;

/// Solid colors paired with the condition each one stands in for.
pub const COLORS: [([u8; 3], Condition); 4] = [
    ([255, 0, 0], Condition::ChoroidalNeovascularization),
    ([0, 255, 0], Condition::DiabeticMacularEdema),
    ([0, 0, 255], Condition::Drusen),
    ([255, 255, 255], Condition::Normal),
];

pub fn encode_png(img: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut bytes, ImageOutputFormat::Png).unwrap();
    bytes
}

pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb))))
}

/// The tensor a solid-color image preprocesses to.
fn solid_tensor(spec: InputSpec, rgb: [u8; 3]) -> Array1<f32> {
    Array1::from_shape_fn(spec.features(), |i| rgb[i % 3] as f32 / 255.0)
}

/// `per_class` samples of each color in `COLORS`, classes interleaved.
pub fn color_training_set(spec: InputSpec, per_class: usize) -> TrainingSet {
    let mapping = LabelMapping::canonical();
    let mut features = Array2::zeros((per_class * COLORS.len(), spec.features()));
    let mut targets = Vec::with_capacity(per_class * COLORS.len());
    for i in 0..per_class {
        for (c, (rgb, label)) in COLORS.iter().enumerate() {
            let row = i * COLORS.len() + c;
            features.row_mut(row).assign(&solid_tensor(spec, *rgb));
            targets.push(mapping.index_of(*label).unwrap());
        }
    }
    TrainingSet::new(features, targets).unwrap()
}

/// Hand-built model that classifies the `COLORS` images perfectly.
pub fn color_classifier(spec: InputSpec) -> Classifier {
    let weights = Array2::from_shape_fn((spec.features(), 4), |(i, class)| {
        let channel = i % 3;
        match class {
            3 => 1.0,
            c if c == channel => 1.0,
            _ => -1.0,
        }
    });
    Classifier::new(
        LabelMapping::canonical(),
        spec,
        weights,
        Array1::zeros(4),
        1,
        Utc::now(),
    )
    .unwrap()
}

/// Arbitrary non-trivial parameters, for artifact and slot tests.
pub fn reference_classifier(spec: InputSpec, version: u64) -> Classifier {
    let weights = Array2::from_shape_fn((spec.features(), 4), |(i, j)| {
        ((i * 7 + j * 3) % 11) as f32 / 50.0 - 0.1
    });
    let bias = Array1::from(vec![0.1, -0.2, 0.05, 0.3]);
    Classifier::new(LabelMapping::canonical(), spec, weights, bias, version, Utc::now()).unwrap()
}

/// Confident on bright images: only the `Normal` column has weight, scaled so
/// an all-white input scores a logit of 10.
pub fn normal_detector(spec: InputSpec) -> Classifier {
    let mapping = LabelMapping::canonical();
    let normal = mapping.index_of(Condition::Normal).unwrap();
    let weight = 10.0 / spec.features() as f32;
    let weights = Array2::from_shape_fn((spec.features(), mapping.len()), |(_, j)| {
        if j == normal {
            weight
        } else {
            0.0
        }
    });
    let bias = Array1::zeros(mapping.len());
    Classifier::new(mapping, spec, weights, bias, 1, Utc::now()).unwrap()
}

/// Mark `scan` doctor-confirmed, optionally with a corrected diagnosis.
pub fn confirm_scan(store: &dyn ScanStore, scan: &Scan, correction: Option<Condition>) -> Scan {
    store
        .update(
            &scan.id,
            &ScanUpdate {
                doctor_confirmed: Some(Some(true)),
                doctor_corrected_diagnosis: correction.map(Some),
                ..Default::default()
            },
            Some(&Assessor {
                username: "dr_test".into(),
                at: Utc::now(),
            }),
        )
        .unwrap()
}
