//! SVG serialization of traced paths.

use std::fmt::Write as _;

use crate::config::DotShape;
use crate::trace::{PathGeometry, PathSet, Point, VectorPath};

/// Format `v` with at most `precision` decimals, trimming trailing zeros.
pub fn format_number(v: f32, precision: u8) -> String {
    let mut s = format!("{:.*}", precision as usize, v);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".into();
    }
    s
}

struct Writer {
    precision: u8,
    out: String,
}

impl Writer {
    fn num(&self, v: f32) -> String {
        format_number(v, self.precision)
    }

    fn point(&self, p: Point) -> String {
        format!("{},{}", self.num(p.x), self.num(p.y))
    }

    fn path_data(&self, geometry: &PathGeometry) -> String {
        let mut d = String::new();
        match geometry {
            PathGeometry::Polyline { points, closed } => {
                for (i, p) in points.iter().enumerate() {
                    let cmd = if i == 0 { "M" } else { " L" };
                    let _ = write!(d, "{cmd}{}", self.point(*p));
                }
                if *closed {
                    d.push_str(" Z");
                }
            }
            PathGeometry::Cubic {
                start,
                segments,
                closed,
            } => {
                let _ = write!(d, "M{}", self.point(*start));
                for s in segments {
                    let _ = write!(
                        d,
                        " C{} {} {}",
                        self.point(s.c1),
                        self.point(s.c2),
                        self.point(s.end)
                    );
                }
                if *closed {
                    d.push_str(" Z");
                }
            }
            PathGeometry::Dot { .. } => {}
        }
        d
    }

    fn paint(&self, path: &VectorPath, gradient: Option<&str>) -> String {
        let mut attrs = String::new();
        match path.fill {
            Some(c) => {
                let _ = write!(attrs, r#" fill="{}""#, c.to_hex());
            }
            None => attrs.push_str(r#" fill="none""#),
        }
        let stroke = match (gradient, path.stroke) {
            (Some(id), _) => Some(format!("url(#{id})")),
            (None, Some(c)) => Some(c.to_hex()),
            (None, None) => None,
        };
        if let Some(stroke) = stroke {
            let _ = write!(
                attrs,
                r#" stroke="{stroke}" stroke-width="{}" stroke-linecap="round" stroke-linejoin="round""#,
                self.num(path.stroke_width)
            );
        }
        if path.opacity < 1.0 {
            let _ = write!(attrs, r#" opacity="{}""#, format_number(path.opacity, 2));
        }
        attrs
    }

    fn dot(&mut self, center: Point, radius: f32, shape: DotShape, paint: &str) {
        let (cx, cy, r) = (center.x, center.y, radius);
        let line = match shape {
            DotShape::Circle => format!(
                r#"<circle cx="{}" cy="{}" r="{}"{paint}/>"#,
                self.num(cx),
                self.num(cy),
                self.num(r)
            ),
            DotShape::Square => format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}"{paint}/>"#,
                self.num(cx - r),
                self.num(cy - r),
                self.num(2.0 * r),
                self.num(2.0 * r)
            ),
            DotShape::Diamond => format!(
                r#"<polygon points="{} {} {} {}"{paint}/>"#,
                self.point(Point::new(cx, cy - r)),
                self.point(Point::new(cx + r, cy)),
                self.point(Point::new(cx, cy + r)),
                self.point(Point::new(cx - r, cy))
            ),
            DotShape::Triangle => format!(
                r#"<polygon points="{} {} {}"{paint}/>"#,
                self.point(Point::new(cx, cy - r)),
                self.point(Point::new(cx + r * 0.866, cy + r * 0.5)),
                self.point(Point::new(cx - r * 0.866, cy + r * 0.5))
            ),
        };
        self.out.push_str(&line);
        self.out.push('\n');
    }
}

/// Render `paths` as a standalone SVG document with `viewBox="0 0 W H"`.
pub fn render(paths: &PathSet, precision: u8) -> String {
    let mut w = Writer {
        precision,
        out: String::new(),
    };
    let _ = writeln!(w.out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        w.out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{0}" height="{1}" viewBox="0 0 {0} {1}">"#,
        paths.width, paths.height
    );

    // Gradients for multi-color strokes, keyed by path index.
    let mut gradients = Vec::new();
    let mut defs = String::new();
    for (i, path) in paths.paths.iter().enumerate() {
        if path.color_stops.len() < 2 || path.stroke.is_none() {
            continue;
        }
        let samples = path.sample_points();
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            continue;
        };
        let id = format!("g{i}");
        let _ = writeln!(
            defs,
            r#"<linearGradient id="{id}" gradientUnits="userSpaceOnUse" x1="{}" y1="{}" x2="{}" y2="{}">"#,
            w.num(first.x),
            w.num(first.y),
            w.num(last.x),
            w.num(last.y)
        );
        let n = path.color_stops.len() - 1;
        for (k, c) in path.color_stops.iter().enumerate() {
            let _ = writeln!(
                defs,
                r#"<stop offset="{}" stop-color="{}"/>"#,
                format_number(k as f32 / n as f32, 3),
                c.to_hex()
            );
        }
        defs.push_str("</linearGradient>\n");
        gradients.push((i, id));
    }
    if !defs.is_empty() {
        w.out.push_str("<defs>\n");
        w.out.push_str(&defs);
        w.out.push_str("</defs>\n");
    }

    for (i, path) in paths.paths.iter().enumerate() {
        let gradient = gradients
            .iter()
            .find(|(idx, _)| *idx == i)
            .map(|(_, id)| id.as_str());
        let paint = w.paint(path, gradient);
        match &path.geometry {
            PathGeometry::Dot {
                center,
                radius,
                shape,
            } => w.dot(*center, *radius, *shape, &paint),
            geometry => {
                let d = w.path_data(geometry);
                if d.is_empty() {
                    continue;
                }
                let _ = writeln!(w.out, r#"<path d="{d}"{paint}/>"#);
            }
        }
    }
    w.out.push_str("</svg>\n");
    w.out
}
