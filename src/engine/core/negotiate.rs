//! Pixel format negotiation between the conversion stage and the encoder.
//!
//! Backends sometimes advertise formats they then refuse to open with, so every match is
//! confirmed with a trial open. The search itself is pure: the trial is injected as a
//! closure and the candidate list is never mutated.

use super::error::{EngineError, EngineResult};
use super::request::ConversionProps;
use super::types::{PixelFormat, StreamDescription, Subsampling, format_list};

/// How source frames reach the negotiated format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPath {
    /// The conversion stage produces the format directly
    Direct,
    /// Convert to `convert_to` first, then reformat generically
    Fallback { convert_to: PixelFormat },
}

/// A format accepted by a trial open, with the candidates not yet tried
#[derive(Debug)]
pub struct Selection<T> {
    pub format: PixelFormat,
    pub opened: T,
    pub remaining: Vec<PixelFormat>,
}

#[derive(Debug)]
pub struct Search<T> {
    pub selection: Option<Selection<T>>,
    /// Formats whose trial open failed, in the order they were tried
    pub rejected: Vec<PixelFormat>,
}

#[derive(Debug)]
pub struct Negotiated<T> {
    pub format: PixelFormat,
    pub opened: T,
    pub path: ConversionPath,
    pub candidates: Vec<PixelFormat>,
}

/// Order the conversion targets by how well they preserve the source
pub fn candidate_formats(
    desc: &StreamDescription,
    props: &ConversionProps,
    targets: &[PixelFormat],
) -> Vec<PixelFormat> {
    let source = desc.source.desc();
    let wanted_depth = props.depth.unwrap_or(source.depth);
    let wanted_rgb = props.rgb.unwrap_or(source.rgb);
    let default_subsampling = if desc.interlacing.is_interlaced() {
        Subsampling::S422
    } else {
        Subsampling::S420
    };
    let wanted_subsampling = props
        .subsampling
        .unwrap_or(default_subsampling.min(source.subsampling));

    let mut formats: Vec<PixelFormat> = targets
        .iter()
        .copied()
        .filter(|f| {
            let d = f.desc();
            props.depth.is_none_or(|depth| d.depth == depth)
                && props.subsampling.is_none_or(|s| d.subsampling == s)
                && props.rgb.is_none_or(|rgb| d.rgb == rgb)
        })
        .collect();

    formats.sort_by_key(|f| {
        let d = f.desc();
        (
            d.rgb != wanted_rgb,
            d.depth < wanted_depth,
            d.depth.abs_diff(wanted_depth),
            d.subsampling != wanted_subsampling,
            f.is_hwaccel(),
        )
    });
    formats.dedup();
    formats
}

/// Drop formats known to misbehave with a backend. Never empties the list.
pub fn apply_blacklist(formats: &mut Vec<PixelFormat>, encoder: &str) {
    if !encoder.contains("nvenc") || !formats.contains(&PixelFormat::X2rgb10) {
        return;
    }
    if formats.len() == 1 {
        tracing::warn!("Only one format remaining, not blacklisting x2rgb10le");
        return;
    }
    tracing::warn!(
        "Blacklisting x2rgb10le for {} (wrong chroma handling), force the pixel format to use it anyway",
        encoder
    );
    formats.retain(|f| *f != PixelFormat::X2rgb10);
}

/// Try candidates in order against the backend list. `try_open` returns `Ok(None)` when
/// the trial open fails; errors abort the search.
pub fn select_format<T, E>(
    candidates: &[PixelFormat],
    supported: &[PixelFormat],
    mut try_open: impl FnMut(PixelFormat) -> Result<Option<T>, E>,
) -> Result<Search<T>, E> {
    let mut rejected = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let Some(format) = supported.iter().copied().find(|f| f == candidate) else {
            continue;
        };
        tracing::debug!("Trying pixel format {}", format);
        match try_open(format)? {
            Some(opened) => {
                return Ok(Search {
                    selection: Some(Selection {
                        format,
                        opened,
                        remaining: candidates[i + 1..].to_vec(),
                    }),
                    rejected,
                });
            }
            None => rejected.push(format),
        }
    }
    Ok(Search {
        selection: None,
        rejected,
    })
}

/// Walk the backend's own list, skipping hardware surfaces and formats already rejected
pub fn fallback_format<T, E>(
    supported: &[PixelFormat],
    rejected: &[PixelFormat],
    mut try_open: impl FnMut(PixelFormat) -> Result<Option<T>, E>,
) -> Result<Option<(PixelFormat, T)>, E> {
    for format in supported
        .iter()
        .copied()
        .filter(|f| !f.is_hwaccel() && !rejected.contains(f))
    {
        if let Some(opened) = try_open(format)? {
            return Ok(Some((format, opened)));
        }
    }
    Ok(None)
}

/// Full negotiation: candidates, blacklist, direct search, then the fallback path
pub fn negotiate<T>(
    encoder: &str,
    supported: &[PixelFormat],
    desc: &StreamDescription,
    props: &ConversionProps,
    forced: Option<PixelFormat>,
    targets: &[PixelFormat],
    mut try_open: impl FnMut(PixelFormat) -> EngineResult<Option<T>>,
) -> EngineResult<Negotiated<T>> {
    let candidates = match forced {
        Some(format) => vec![format],
        None => candidate_formats(desc, props, targets),
    };
    let mut filtered = candidates.clone();
    if forced.is_none() {
        apply_blacklist(&mut filtered, encoder);
    }

    let search = select_format(&filtered, supported, &mut try_open)?;
    if let Some(selection) = search.selection {
        log_selected(selection.format);
        return Ok(Negotiated {
            format: selection.format,
            opened: selection.opened,
            path: ConversionPath::Direct,
            candidates: filtered,
        });
    }

    tracing::debug!(
        "Candidates: {}; encoder supports: {}",
        format_list(&filtered),
        format_list(supported)
    );

    if forced.is_none() {
        tracing::warn!(
            "No direct format for {}, trying the generic conversion path",
            desc.source
        );
        if let Some((format, opened)) = fallback_format(supported, &search.rejected, &mut try_open)? {
            let convert_to = candidates.first().copied().unwrap_or(PixelFormat::Uyvy422);
            tracing::info!("Converting {} via {} to {}", desc.source, convert_to, format);
            log_selected(format);
            return Ok(Negotiated {
                format,
                opened,
                path: ConversionPath::Fallback { convert_to },
                candidates: filtered,
            });
        }
    }

    let hint = if forced.is_some() {
        ". Do not enforce the pixel format or use a supported one."
    } else if props.is_forced() {
        ". Requested parameters not supported; do not enforce subsampling/depth/colour model or use a feasible configuration."
    } else {
        ""
    };
    Err(EngineError::NoCompatiblePixelFormat {
        source_format: desc.source,
        candidates: format_list(&filtered),
        supported: format_list(supported),
        hint: hint.to_string(),
    })
}

fn log_selected(format: PixelFormat) {
    tracing::info!("Selected pixel format: {}", format);
    if format.desc().subsampling != Subsampling::S420 && !format.is_hwaccel() {
        tracing::warn!(
            "Selected pixel format is not 4:2:0, which is usually not supported by hardware decoders"
        );
    }
}
