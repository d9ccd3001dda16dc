use foundation::math::Vec2;
use scene::item::MapItem;
use smol_str::{SmolStr, format_smolstr};

use crate::symbology::{
    ClusterTier, PILL_HEIGHT_PX, cluster_diameter_px, format_price, pill_colors, pill_width_px,
};

/// Everything that determines how a glyph looks, and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GlyphSpec {
    Price {
        /// Whole currency units; sub-unit changes never alter the label.
        amount: i64,
        currency: SmolStr,
        hovered: bool,
        selected: bool,
    },
    Cluster {
        count: u32,
        hovered: bool,
    },
}

impl GlyphSpec {
    pub fn for_item(item: &MapItem) -> Self {
        match item {
            MapItem::Property(p) => GlyphSpec::Price {
                amount: p.price.round() as i64,
                currency: p.currency.clone(),
                hovered: p.is_hovered,
                selected: p.is_selected,
            },
            MapItem::Cluster(c) => GlyphSpec::Cluster {
                count: c.count,
                hovered: c.is_hovered || c.is_selected,
            },
        }
    }

    /// Canonical cache key, e.g. `cluster:42` or `price:1250:EUR:hover`.
    pub fn key(&self) -> SmolStr {
        match self {
            GlyphSpec::Price {
                amount,
                currency,
                hovered,
                selected,
            } => {
                let emphasis = match (hovered, selected) {
                    (_, true) => ":selected",
                    (true, false) => ":hover",
                    (false, false) => "",
                };
                format_smolstr!("price:{amount}:{currency}{emphasis}")
            }
            GlyphSpec::Cluster { count, hovered } => {
                let emphasis = if *hovered { ":hover" } else { "" };
                format_smolstr!("cluster:{count}{emphasis}")
            }
        }
    }

    pub fn render(&self) -> Glyph {
        match self {
            GlyphSpec::Price {
                amount,
                currency,
                hovered,
                selected,
            } => render_price(*amount, currency, *hovered, *selected, self.key()),
            GlyphSpec::Cluster { count, hovered } => render_cluster(*count, *hovered, self.key()),
        }
    }
}

/// Immutable rendered glyph: an SVG document plus its placement metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub key: SmolStr,
    pub svg: String,
    pub size_px: Vec2,
    /// Offset from the glyph's top-left corner to the geographic anchor.
    pub anchor_px: Vec2,
}

impl Glyph {
    /// `data:` URL form, for hosts that take icons as image sources.
    pub fn data_url(&self) -> String {
        let mut out = String::with_capacity(self.svg.len() + 32);
        out.push_str("data:image/svg+xml;utf8,");
        for ch in self.svg.chars() {
            match ch {
                '#' => out.push_str("%23"),
                '<' => out.push_str("%3C"),
                '>' => out.push_str("%3E"),
                '"' => out.push('\''),
                _ => out.push(ch),
            }
        }
        out
    }
}

fn render_price(amount: i64, currency: &str, hovered: bool, selected: bool, key: SmolStr) -> Glyph {
    let label = format_price(amount as f64, currency);
    let colors = pill_colors(hovered, selected);
    let w = pill_width_px(&label);
    let h = PILL_HEIGHT_PX;
    let tail = 6.0;
    let stroke = if hovered || selected { 2.0 } else { 1.0 };
    let svg = format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{th}\" viewBox=\"0 0 {w} {th}\">",
            "<rect x=\"1\" y=\"1\" width=\"{iw}\" height=\"{ih}\" rx=\"{r}\" fill=\"{fill}\" stroke=\"{stroke_c}\" stroke-width=\"{sw}\"/>",
            "<path d=\"M{tl} {h} L{cx} {th} L{tr} {h} Z\" fill=\"{fill}\"/>",
            "<text x=\"{cx}\" y=\"{ty}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"12\" font-weight=\"600\" fill=\"{text}\">{label}</text>",
            "</svg>"
        ),
        w = w,
        th = h + tail,
        iw = w - 2.0,
        ih = h - 2.0,
        r = h / 2.0,
        h = h,
        cx = w / 2.0,
        tl = w / 2.0 - tail,
        tr = w / 2.0 + tail,
        ty = h / 2.0 + 4.0,
        fill = colors.fill,
        stroke_c = colors.stroke,
        sw = stroke,
        text = colors.text,
        label = escape_xml(&label),
    );
    Glyph {
        key,
        svg,
        size_px: Vec2::new(w, h + tail),
        anchor_px: Vec2::new(w / 2.0, h + tail),
    }
}

fn render_cluster(count: u32, hovered: bool, key: SmolStr) -> Glyph {
    let d = cluster_diameter_px(count).round();
    let fill = ClusterTier::for_count(count).fill();
    let ring = if hovered { 0.55 } else { 0.3 };
    let label = if count >= 1_000 {
        format!("{}k", count / 1_000)
    } else {
        count.to_string()
    };
    let svg = format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{d}\" height=\"{d}\" viewBox=\"0 0 {d} {d}\">",
            "<circle cx=\"{c}\" cy=\"{c}\" r=\"{c}\" fill=\"{fill}\" fill-opacity=\"{ring}\"/>",
            "<circle cx=\"{c}\" cy=\"{c}\" r=\"{inner}\" fill=\"{fill}\"/>",
            "<text x=\"{c}\" y=\"{ty}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"13\" font-weight=\"700\" fill=\"#ffffff\">{label}</text>",
            "</svg>"
        ),
        d = d,
        c = d / 2.0,
        inner = d / 2.0 - 5.0,
        ty = d / 2.0 + 4.5,
        fill = fill,
        ring = ring,
        label = label,
    );
    Glyph {
        key,
        svg,
        size_px: Vec2::new(d, d),
        anchor_px: Vec2::new(d / 2.0, d / 2.0),
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
