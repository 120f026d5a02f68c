//! Binary masks and square-kernel morphology.
//!
//! Pixels outside the image are ignored by both erosion and dilation, so a
//! shape touching the border is not eaten away from that side.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|set| **set).count()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub fn erode(mask: &Mask, kernel: usize) -> Mask {
    apply(mask, kernel, true)
}

pub fn dilate(mask: &Mask, kernel: usize) -> Mask {
    apply(mask, kernel, false)
}

/// Dilate then erode, `iterations` times each.
pub fn close(mask: &Mask, kernel: usize, iterations: usize) -> Mask {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = dilate(&out, kernel);
    }
    for _ in 0..iterations {
        out = erode(&out, kernel);
    }
    out
}

/// Erode then dilate, `iterations` times each.
pub fn open(mask: &Mask, kernel: usize, iterations: usize) -> Mask {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = erode(&out, kernel);
    }
    for _ in 0..iterations {
        out = dilate(&out, kernel);
    }
    out
}

// A square kernel is separable: a row pass followed by a column pass.
fn apply(mask: &Mask, kernel: usize, all: bool) -> Mask {
    let radius = kernel / 2;
    if radius == 0 || mask.is_empty() {
        return mask.clone();
    }
    let (width, height) = (mask.width, mask.height);

    let rows = Mask::from_fn(width, height, |x, y| {
        let lo = x.saturating_sub(radius);
        let hi = (x + radius).min(width - 1);
        reduce((lo..=hi).map(|nx| mask.get(nx, y)), all)
    });
    Mask::from_fn(width, height, |x, y| {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        reduce((lo..=hi).map(|ny| rows.get(x, ny)), all)
    })
}

fn reduce(mut values: impl Iterator<Item = bool>, all: bool) -> bool {
    if all {
        values.all(|v| v)
    } else {
        values.any(|v| v)
    }
}
