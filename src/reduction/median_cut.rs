//! Weighted median cut followed by a few k-means refinement passes.
//!
//! Boxes live in the context's weighted YIQ space, so the balance sliders decide which axis gets
//! cut first. Output colours are weighted RGB means of each cluster snapped to RGB555.

use super::{HistEntry, ReductionContext};
use crate::color::{blue, green, red, round_to_555, Rgba32};

const REFINE_PASSES: usize = 4;

struct ColorBox {
    members: Vec<usize>,
    weight: f64,
    axis: usize,
    range: f64,
}

impl ColorBox {
    fn new(members: Vec<usize>, coords: &[[f64; 3]], entries: &[HistEntry]) -> Self {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        let mut weight = 0.0;
        for &m in &members {
            weight += entries[m].weight;
            for axis in 0..3 {
                lo[axis] = lo[axis].min(coords[m][axis]);
                hi[axis] = hi[axis].max(coords[m][axis]);
            }
        }
        let mut axis = 0;
        for a in 1..3 {
            if hi[a] - lo[a] > hi[axis] - lo[axis] {
                axis = a;
            }
        }
        Self {
            range: hi[axis] - lo[axis],
            members,
            weight,
            axis,
        }
    }

    fn score(&self) -> f64 {
        if self.members.len() < 2 {
            0.0
        } else {
            self.weight * self.range
        }
    }
}

fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (0..3).map(|k| (a[k] - b[k]) * (a[k] - b[k])).sum()
}

/// Reduce `entries` to at most `n` colours. Fewer come back when there is not enough distinct data.
pub(crate) fn reduce(ctx: &ReductionContext, entries: &[HistEntry], n: usize) -> Vec<Rgba32> {
    if n == 0 || entries.is_empty() {
        return Vec::new();
    }
    if entries.len() <= n {
        return entries.iter().map(|e| e.color).collect();
    }

    let coords: Vec<[f64; 3]> = entries.iter().map(|e| ctx.weighted_coords(&e.yiq)).collect();

    let mut boxes = vec![ColorBox::new((0..entries.len()).collect(), &coords, entries)];
    while boxes.len() < n {
        let Some((target, _)) = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.score() > 0.0)
            .max_by(|(_, a), (_, b)| a.score().total_cmp(&b.score()))
        else {
            break;
        };

        let mut split = boxes.swap_remove(target);
        let axis = split.axis;
        split
            .members
            .sort_by(|&a, &b| coords[a][axis].total_cmp(&coords[b][axis]));

        let half = split.weight / 2.0;
        let mut acc = 0.0;
        let mut cut = 1;
        for (k, &m) in split.members.iter().enumerate() {
            acc += entries[m].weight;
            if acc >= half {
                cut = k + 1;
                break;
            }
        }
        let cut = cut.clamp(1, split.members.len() - 1);
        let upper = split.members.split_off(cut);
        boxes.push(ColorBox::new(split.members, &coords, entries));
        boxes.push(ColorBox::new(upper, &coords, entries));
    }

    let clusters: Vec<Vec<usize>> = boxes.into_iter().map(|b| b.members).collect();
    let mut centroids: Vec<[f64; 3]> = clusters
        .iter()
        .map(|members| weighted_centroid(members, &coords, entries))
        .collect();
    let mut colors: Vec<Rgba32> = clusters
        .iter()
        .map(|members| mean_color(members, entries))
        .collect();

    let mut assignment = vec![0usize; entries.len()];
    for _ in 0..REFINE_PASSES {
        for (e, coord) in coords.iter().enumerate() {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_distance(coord, centroid);
                if d < best_distance {
                    best_distance = d;
                    best = c;
                }
            }
            assignment[e] = best;
        }

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); centroids.len()];
        for (e, &c) in assignment.iter().enumerate() {
            members[c].push(e);
        }
        for (c, cluster) in members.iter().enumerate() {
            // An emptied cluster keeps its previous position.
            if cluster.is_empty() {
                continue;
            }
            centroids[c] = weighted_centroid(cluster, &coords, entries);
            colors[c] = mean_color(cluster, entries);
        }
    }

    colors
}

fn weighted_centroid(members: &[usize], coords: &[[f64; 3]], entries: &[HistEntry]) -> [f64; 3] {
    let mut sum = [0.0; 3];
    let mut weight = 0.0;
    for &m in members {
        let w = entries[m].weight;
        weight += w;
        for k in 0..3 {
            sum[k] += coords[m][k] * w;
        }
    }
    if weight > 0.0 {
        for s in &mut sum {
            *s /= weight;
        }
    }
    sum
}

fn mean_color(members: &[usize], entries: &[HistEntry]) -> Rgba32 {
    let (mut r, mut g, mut b, mut weight) = (0.0, 0.0, 0.0, 0.0);
    for &m in members {
        let e = &entries[m];
        r += red(e.color) as f64 * e.weight;
        g += green(e.color) as f64 * e.weight;
        b += blue(e.color) as f64 * e.weight;
        weight += e.weight;
    }
    if weight <= 0.0 {
        return 0xFF00_0000;
    }
    let channel = |v: f64| (v / weight).round().clamp(0.0, 255.0) as u32;
    let mean = channel(r) | channel(g) << 8 | channel(b) << 16 | 0xFF00_0000;
    round_to_555(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::pack;
    use crate::reduction::{BalanceParams, Histogram};

    fn entries_of(colors: &[(Rgba32, usize)]) -> Vec<HistEntry> {
        let mut h = Histogram::default();
        for &(c, count) in colors {
            for _ in 0..count {
                h.add(c, false);
            }
        }
        h.flatten()
    }

    #[test]
    fn few_entries_pass_through() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 4);
        let entries = entries_of(&[(pack(255, 0, 0, 255), 3), (pack(0, 255, 0, 255), 1)]);
        let out = reduce(&ctx, &entries, 4);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn separates_two_clusters() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 2);
        let entries = entries_of(&[
            (pack(0, 0, 0, 255), 10),
            (pack(8, 8, 8, 255), 10),
            (pack(255, 255, 255, 255), 10),
            (pack(247, 247, 247, 255), 10),
        ]);
        let mut out = reduce(&ctx, &entries, 2);
        out.sort_unstable();
        assert_eq!(out.len(), 2);
        assert!(red(out[0]) < 16);
        assert!(red(out[1]) > 240);
    }

    #[test]
    fn output_is_hardware_representable() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 3);
        let entries = entries_of(&[
            (pack(10, 200, 30, 255), 5),
            (pack(90, 20, 130, 255), 2),
            (pack(250, 240, 10, 255), 7),
            (pack(40, 40, 40, 255), 1),
            (pack(200, 100, 50, 255), 3),
        ]);
        for c in reduce(&ctx, &entries, 3) {
            assert_eq!(round_to_555(c), c);
            assert_eq!(c >> 24, 0xFF);
        }
    }
}
