use std::collections::BTreeMap;

use crate::color::{rgb_to_yiq, round_to_555, Rgba32, Yiq};

/// One distinct (DS-representable) colour and its accumulated weight.
#[derive(Debug, Clone, PartialEq)]
pub struct HistEntry {
    pub color: Rgba32,
    pub yiq: Yiq,
    pub weight: f64,
}

/// Colour → weight accumulation. Keys are 24-bit colours snapped to RGB555, so colours the
/// hardware cannot tell apart share a bucket.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    buckets: BTreeMap<u32, f64>,
}

impl Histogram {
    pub fn add(&mut self, color: Rgba32, enhance_colors: bool) {
        let key = round_to_555(color) & 0xFF_FFFF;
        let weight = if enhance_colors {
            let yiq = rgb_to_yiq(key);
            let chroma = ((yiq.i * yiq.i + yiq.q * yiq.q) as f64).sqrt();
            1.0 + chroma / 64.0
        } else {
            1.0
        };
        *self.buckets.entry(key).or_insert(0.0) += weight;
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    /// Snapshot of the buckets in ascending colour order.
    pub fn flatten(&self) -> Vec<HistEntry> {
        self.buckets
            .iter()
            .map(|(&key, &weight)| {
                let color = key | 0xFF00_0000;
                HistEntry {
                    color,
                    yiq: rgb_to_yiq(color),
                    weight,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::pack;

    #[test]
    fn near_colours_share_a_bucket() {
        let mut h = Histogram::default();
        h.add(pack(255, 0, 0, 255), false);
        h.add(pack(254, 1, 0, 255), false);
        assert_eq!(h.len(), 1);
        assert_eq!(h.flatten()[0].weight, 2.0);
    }

    #[test]
    fn enhance_boosts_saturated_colours() {
        let mut h = Histogram::default();
        h.add(pack(255, 0, 0, 255), true);
        h.add(pack(128, 128, 128, 255), true);
        let entries = h.flatten();
        let grey = entries.iter().find(|e| e.color == pack(132, 132, 132, 255)).unwrap();
        let red = entries.iter().find(|e| e.color == pack(255, 0, 0, 255)).unwrap();
        assert_eq!(grey.weight, 1.0);
        assert!(red.weight > 2.0);
    }
}
