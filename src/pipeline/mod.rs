//! Per-poster pipeline stages.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ normalize ──▶ (resize) ──▶ diff
//! (HTTP)    (png/jpg/svg/pdf → png)     (pixel count + red overlay)
//!   ▲            │
//!   └─ retry     └─ render (resvg / pdfium), spawn_blocking
//! ```
//!
//! 1. [`fetch`]: build the service URL and download with [`retry`]
//! 2. [`normalize`]: check the declared format and convert to PNG; SVG and
//!    PDF go through [`render`]
//! 3. [`diff`]: count differing pixels and draw the visualisation
//! 4. [`placeholder`]: stands in for a baseline that was never stored
//!
//! Everything except [`fetch`] and [`retry`] is blocking and runs inside
//! `spawn_blocking`.

pub mod diff;
pub mod fetch;
pub mod normalize;
pub mod placeholder;
pub mod render;
pub mod retry;
