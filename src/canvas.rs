use anyhow::{anyhow, Context, Result};
use image::{Rgba, RgbaImage};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Pixel-space polygon: exterior ring followed by any holes.
pub type Rings = Vec<Vec<(f64, f64)>>;

pub trait Canvas {
    fn polygon(&mut self, rings: &Rings, fill: Rgba<u8>, edge: Rgba<u8>);
    fn marker(&mut self, at: (f64, f64), radius: f64, color: Rgba<u8>);
    fn label(&mut self, at: (f64, f64), text: &str);
    fn title(&mut self, text: &str);
    fn frame(&mut self, min: (f64, f64), max: (f64, f64));
    fn save(&self, path: &Path) -> Result<()>;
}

/// Picks a backend from the output file extension.
pub fn canvas_for(path: &Path, width: u32, height: u32) -> Result<Box<dyn Canvas>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Map file has no extension: {:?}", path))?;

    match extension.as_str() {
        "png" => Ok(Box::new(PngCanvas::new(width, height))),
        "svg" => Ok(Box::new(SvgCanvas::new(width, height))),
        _ => Err(anyhow!("Unsupported map format: {}", extension)),
    }
}

pub fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .unwrap_or(0)
    };
    let alpha = if hex.len() >= 8 { channel(6) } else { 255 };
    Rgba([channel(0), channel(2), channel(4), alpha])
}

/// Drops the repeated closing point of a closed ring.
fn open_ring(ring: &[(f64, f64)]) -> &[(f64, f64)] {
    if ring.len() > 1 && ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        ring
    }
}

fn edges(ring: &[(f64, f64)]) -> impl Iterator<Item = (&(f64, f64), &(f64, f64))> + '_ {
    let ring = open_ring(ring);
    ring.iter().zip(ring.iter().cycle().skip(1))
}

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub struct PngCanvas {
    image: RgbaImage,
    skipped_text: usize,
}

impl PngCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        PngCanvas {
            image: RgbaImage::from_pixel(width, height, WHITE),
            skipped_text: 0,
        }
    }

    #[cfg(test)]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn blend(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }
        let pixel = self.image.get_pixel_mut(x as u32, y as u32);
        let alpha = color[3] as u32;
        for c in 0..3 {
            pixel[c] = ((color[c] as u32 * alpha + pixel[c] as u32 * (255 - alpha)) / 255) as u8;
        }
        pixel[3] = 255;
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgba<u8>) {
        // Bresenham
        let (mut x0, mut y0) = (from.0.floor() as i64, from.1.floor() as i64);
        let (x1, y1) = (to.0.floor() as i64, to.1.floor() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.blend(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}

impl Canvas for PngCanvas {
    /// Even-odd scanline fill sampled at pixel centres, then the ring outlines.
    fn polygon(&mut self, rings: &Rings, fill: Rgba<u8>, edge: Rgba<u8>) {
        let (min_y, max_y) = rings
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
        if !min_y.is_finite() {
            return;
        }

        let first_row = (min_y.floor() as i64).max(0);
        let last_row = (max_y.ceil() as i64).min(self.image.height() as i64 - 1);
        let mut crossings = Vec::new();

        for row in first_row..=last_row {
            let yc = row as f64 + 0.5;
            crossings.clear();
            for ring in rings {
                for (a, b) in edges(ring) {
                    if (a.1 <= yc) != (b.1 <= yc) {
                        crossings.push(a.0 + (yc - a.1) / (b.1 - a.1) * (b.0 - a.0));
                    }
                }
            }
            crossings.sort_by(|l, r| l.total_cmp(r));
            for span in crossings.chunks_exact(2) {
                let start = (span[0] - 0.5).ceil() as i64;
                let end = (span[1] - 0.5).floor() as i64;
                for x in start..=end {
                    self.blend(x, row, fill);
                }
            }
        }

        for ring in rings {
            for (a, b) in edges(ring) {
                self.line(*a, *b, edge);
            }
        }
    }

    fn marker(&mut self, at: (f64, f64), radius: f64, color: Rgba<u8>) {
        let r = radius.ceil() as i64;
        let (cx, cy) = (at.0.floor() as i64, at.1.floor() as i64);
        for y in -r..=r {
            for x in -r..=r {
                if ((x * x + y * y) as f64) <= radius * radius {
                    self.blend(cx + x, cy + y, color);
                }
            }
        }
    }

    fn label(&mut self, _at: (f64, f64), _text: &str) {
        self.skipped_text += 1;
    }

    fn title(&mut self, _text: &str) {
        self.skipped_text += 1;
    }

    fn frame(&mut self, min: (f64, f64), max: (f64, f64)) {
        self.line(min, (max.0, min.1), BLACK);
        self.line((max.0, min.1), max, BLACK);
        self.line(max, (min.0, max.1), BLACK);
        self.line((min.0, max.1), min, BLACK);
    }

    fn save(&self, path: &Path) -> Result<()> {
        if self.skipped_text > 0 {
            debug!("PNG output has no text; {} labels omitted from {:?}", self.skipped_text, path);
        }
        self.image
            .save(path)
            .with_context(|| format!("Failed to save map: {:?}", path))
    }
}

pub struct SvgCanvas {
    width: u32,
    height: u32,
    body: String,
}

impl SvgCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        SvgCanvas { width, height, body: String::new() }
    }

    pub fn document(&self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">\n\
             <rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n{body}</svg>\n",
            w = self.width,
            h = self.height,
            body = self.body,
        )
    }
}

fn css_color(color: Rgba<u8>) -> String {
    if color[3] == 255 {
        format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
    } else {
        format!("rgba({},{},{},{:.3})", color[0], color[1], color[2], color[3] as f64 / 255.0)
    }
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl Canvas for SvgCanvas {
    fn polygon(&mut self, rings: &Rings, fill: Rgba<u8>, edge: Rgba<u8>) {
        let mut d = String::new();
        for ring in rings {
            for (i, (x, y)) in open_ring(ring).iter().enumerate() {
                let command = if i == 0 { 'M' } else { 'L' };
                let _ = write!(d, "{}{:.1} {:.1} ", command, x, y);
            }
            d.push_str("Z ");
        }
        let _ = writeln!(
            self.body,
            "<path d=\"{}\" fill=\"{}\" stroke=\"{}\" stroke-width=\"0.5\" fill-rule=\"evenodd\"/>",
            d.trim_end(),
            css_color(fill),
            css_color(edge),
        );
    }

    fn marker(&mut self, at: (f64, f64), radius: f64, color: Rgba<u8>) {
        let _ = writeln!(
            self.body,
            "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"{:.1}\" fill=\"{}\"/>",
            at.0,
            at.1,
            radius,
            css_color(color),
        );
    }

    fn label(&mut self, at: (f64, f64), text: &str) {
        let _ = writeln!(
            self.body,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-family=\"sans-serif\" font-size=\"9\" text-anchor=\"middle\">{}</text>",
            at.0,
            at.1,
            escape_xml(text),
        );
    }

    fn title(&mut self, text: &str) {
        let _ = writeln!(
            self.body,
            "<text x=\"{:.1}\" y=\"18\" font-family=\"sans-serif\" font-size=\"16\" text-anchor=\"middle\">{}</text>",
            self.width as f64 / 2.0,
            escape_xml(text),
        );
    }

    fn frame(&mut self, min: (f64, f64), max: (f64, f64)) {
        let _ = writeln!(
            self.body,
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"none\" stroke=\"#000000\"/>",
            min.0.min(max.0),
            min.1.min(max.1),
            (max.0 - min.0).abs(),
            (max.1 - min.1).abs(),
        );
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.document()).with_context(|| format!("Failed to save map: {:?}", path))
    }
}
