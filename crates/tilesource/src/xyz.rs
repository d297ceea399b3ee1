use layergl::{ChannelRequest, FetchError, TileUrlBuilder};

use crate::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Subdomain,
    X,
    Y,
    InvertedY,
    Z,
    /// `{r}`: retina suffix, always empty here.
    Retina,
}

/// Slippy-map URL template such as `https://{s}.tile.example.org/{z}/{x}/{y}.png`.
///
/// Supported placeholders are `{s}` (subdomain, rotated by tile), `{x}`,
/// `{y}`, `{-y}` (TMS row order), `{z}` and `{r}`. Columns wrap around the
/// antimeridian; rows outside the grid have no image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XyzTemplate {
    template: String,
    segments: Vec<Segment>,
    subdomains: Vec<String>,
}

impl XyzTemplate {
    pub fn new(template: &str, subdomains: Vec<String>) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
            let segment = match &after[..close] {
                "s" => Segment::Subdomain,
                "x" => Segment::X,
                "y" => Segment::Y,
                "-y" => Segment::InvertedY,
                "z" => Segment::Z,
                "r" => Segment::Retina,
                other => return Err(TemplateError::UnknownPlaceholder(other.to_string())),
            };
            segments.push(segment);
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        if segments.contains(&Segment::Subdomain) && subdomains.is_empty() {
            return Err(TemplateError::MissingSubdomains(template.to_string()));
        }
        Ok(Self {
            template: template.to_string(),
            segments,
            subdomains,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// URL of tile `x`/`y` at zoom `z`, or `None` when the row is off the grid.
    pub fn url_for(&self, x: i64, y: i64, z: u8) -> Option<String> {
        let span = 1i64.checked_shl(u32::from(z))?;
        if !(0..span).contains(&y) {
            return None;
        }
        let x = x.rem_euclid(span);

        let mut url = String::with_capacity(self.template.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Subdomain => {
                    let index = (x + y).unsigned_abs() as usize % self.subdomains.len();
                    url.push_str(&self.subdomains[index]);
                }
                Segment::X => url.push_str(&x.to_string()),
                Segment::Y => url.push_str(&y.to_string()),
                Segment::InvertedY => url.push_str(&(span - 1 - y).to_string()),
                Segment::Z => url.push_str(&z.to_string()),
                Segment::Retina => {}
            }
        }
        Some(url)
    }
}

impl TileUrlBuilder for XyzTemplate {
    fn tile_url(&self, request: &ChannelRequest) -> Result<String, FetchError> {
        let coords = request.coords;
        self.url_for(coords.x, coords.y, coords.z)
            .ok_or_else(|| FetchError::Unavailable {
                tile: coords.to_string(),
                reason: format!("row {} is outside the zoom {} grid", coords.y, coords.z),
            })
    }
}
