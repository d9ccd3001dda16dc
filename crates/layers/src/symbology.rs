//! Visual parameters of marker glyphs.

/// Smallest cluster glyph, used for the minimum count of two.
pub const CLUSTER_MIN_DIAMETER_PX: f64 = 32.0;
/// Largest cluster glyph; counts at or above [`CLUSTER_SATURATION_COUNT`] stop growing.
pub const CLUSTER_MAX_DIAMETER_PX: f64 = 72.0;
pub const CLUSTER_SATURATION_COUNT: u32 = 10_000;

/// Cluster diameter as a logarithmic, saturating function of `count`.
///
/// Monotonically non-decreasing and clamped to [`CLUSTER_MAX_DIAMETER_PX`].
pub fn cluster_diameter_px(count: u32) -> f64 {
    if count <= 2 {
        return CLUSTER_MIN_DIAMETER_PX;
    }
    let lo = 2.0_f64.ln();
    let hi = f64::from(CLUSTER_SATURATION_COUNT).ln();
    let t = ((f64::from(count).ln() - lo) / (hi - lo)).clamp(0.0, 1.0);
    CLUSTER_MIN_DIAMETER_PX + (CLUSTER_MAX_DIAMETER_PX - CLUSTER_MIN_DIAMETER_PX) * t
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterTier {
    Small,
    Medium,
    Large,
    Huge,
}

impl ClusterTier {
    pub fn for_count(count: u32) -> Self {
        match count {
            0..10 => ClusterTier::Small,
            10..100 => ClusterTier::Medium,
            100..1000 => ClusterTier::Large,
            _ => ClusterTier::Huge,
        }
    }

    pub fn fill(self) -> &'static str {
        match self {
            ClusterTier::Small => "#4f8ef7",
            ClusterTier::Medium => "#2f6fd6",
            ClusterTier::Large => "#f29d38",
            ClusterTier::Huge => "#e0543b",
        }
    }
}

/// Colours of a price pill for a given emphasis.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PillColors {
    pub fill: &'static str,
    pub text: &'static str,
    pub stroke: &'static str,
}

pub fn pill_colors(hovered: bool, selected: bool) -> PillColors {
    match (hovered, selected) {
        (_, true) => PillColors {
            fill: "#1a1a1a",
            text: "#ffffff",
            stroke: "#1a1a1a",
        },
        (true, false) => PillColors {
            fill: "#ffffff",
            text: "#1a1a1a",
            stroke: "#1a1a1a",
        },
        (false, false) => PillColors {
            fill: "#ffffff",
            text: "#1a1a1a",
            stroke: "#c8c8c8",
        },
    }
}

fn currency_symbol(code: &str) -> Option<&'static str> {
    match code {
        "EUR" => Some("€"),
        "USD" => Some("$"),
        "GBP" => Some("£"),
        "CHF" => Some("CHF "),
        _ => None,
    }
}

/// Compact price label: `950 €`-style amounts shortened to `k` and `M`.
pub fn format_price(price: f64, currency: &str) -> String {
    let amount = if price >= 1_000_000.0 {
        trim_decimal(format!("{:.1}", price / 1_000_000.0)) + "M"
    } else if price >= 10_000.0 {
        format!("{:.0}k", price / 1_000.0)
    } else if price >= 1_000.0 {
        trim_decimal(format!("{:.1}", price / 1_000.0)) + "k"
    } else {
        format!("{:.0}", price)
    };

    match currency_symbol(currency) {
        Some(symbol) => format!("{symbol}{amount}"),
        None => format!("{amount} {currency}"),
    }
}

fn trim_decimal(s: String) -> String {
    match s.strip_suffix(".0") {
        Some(t) => t.to_string(),
        None => s,
    }
}

/// Estimated pill width for a label of `text`, in pixels.
pub fn pill_width_px(text: &str) -> f64 {
    let chars = text.chars().count().max(1) as f64;
    (chars * 7.5 + 16.0).round()
}

pub const PILL_HEIGHT_PX: f64 = 24.0;
