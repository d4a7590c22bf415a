//! Provisioning token → scannable QR code.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;

use lb_domain::error::{Error, Result};

/// Render `token` as an SVG QR code wrapped in a `data:` URL that a
/// browser can put straight into an `<img src>`.
pub fn token_to_data_url(token: &str) -> Result<String> {
    let code = QrCode::new(token.as_bytes())
        .map_err(|e| Error::Dependency(format!("QR generation failed: {e}")))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}
