//! Expression parser: lowers a wxpath expression into a [`Program`].
//!
//! The scanner splits the expression into `url(...)` partitions and the
//! XPath runs between them, tracking quote and bracket balance so URLs
//! and predicates containing parentheses survive intact. Classification
//! and normalisation then produce the final segment list.

use crate::error::ParseError;
use crate::xpath::CompiledXPath;

use super::{Program, Segment, SegmentOp, UrlAxis, UrlLit};

/// Parse a wxpath expression into a validated, normalised program.
pub fn parse(expression: &str) -> Result<Program, ParseError> {
    let partitions = scan_partitions(expression)?;
    let mut raw = Vec::new();
    for (offset, text) in partitions {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        raw.push(classify(offset, text)?);
    }
    let raw = merge_trailing_url_dot(raw);
    build(raw)
}

// ---------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------

/// Splits the expression into url-op and XPath partitions, returning
/// each with its byte offset.
fn scan_partitions(input: &str) -> Result<Vec<(usize, String)>, ParseError> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(prefix) = match_url_open(bytes, i) {
            let seg_start = i;
            i += prefix + 4; // slashes + "url("
            let mut depth = 1usize;
            let mut quote: Option<u8> = None;
            while i < bytes.len() && depth > 0 {
                let ch = bytes[i];
                match quote {
                    Some(q) => {
                        if ch == q {
                            quote = None;
                        }
                    }
                    None => match ch {
                        b'\'' | b'"' => quote = Some(ch),
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    },
                }
                i += 1;
            }
            if depth > 0 {
                return Err(ParseError::new(seg_start, "unbalanced parentheses in url()"));
            }
            parts.push((seg_start, input[seg_start..i].to_string()));
        } else {
            // accumulate XPath text until the next url( outside quotes
            let seg_start = i;
            let mut quote: Option<u8> = None;
            let mut j = i;
            loop {
                if j >= bytes.len() {
                    break;
                }
                let ch = bytes[j];
                match quote {
                    Some(q) => {
                        if ch == q {
                            quote = None;
                        }
                        j += 1;
                    }
                    None => {
                        if match_url_open(bytes, j).is_some() {
                            break;
                        }
                        if ch == b'\'' || ch == b'"' {
                            quote = Some(ch);
                        }
                        j += 1;
                    }
                }
            }
            if seg_start != j {
                parts.push((seg_start, input[seg_start..j].to_string()));
            }
            i = j;
        }
    }
    Ok(parts)
}

/// Matches `/{0,3}url(` at `pos`, returning the slash-prefix length.
/// The longest slash prefix wins because scanning starts at the first
/// slash. Without a slash prefix, `url(` must sit on an identifier
/// boundary so names like `curl(` are not split.
fn match_url_open(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut slashes = 0;
    while slashes < 3 && bytes.get(pos + slashes) == Some(&b'/') {
        slashes += 1;
    }
    let rest = &bytes[pos + slashes..];
    if !rest.starts_with(b"url(") {
        return None;
    }
    if slashes == 0 && pos > 0 {
        let prev = bytes[pos - 1];
        if prev.is_ascii_alphanumeric() || prev == b'_' || prev == b'-' || prev == b':' {
            return None;
        }
    }
    Some(slashes)
}

// ---------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------

#[derive(Debug)]
enum RawSegment {
    UrlLit {
        offset: usize,
        url: String,
        follow: Option<String>,
        depth: Option<usize>,
    },
    UrlOp {
        offset: usize,
        slashes: usize,
        arg: String,
    },
    Xpath {
        offset: usize,
        expr: String,
    },
    BinaryTail {
        offset: usize,
        op: SegmentOp,
        expr: String,
    },
    MapLit {
        offset: usize,
        entries: Vec<(String, String)>,
    },
    /// A trailing `url(.)` merged with its preceding XPath run.
    MergedUrl {
        offset: usize,
        deep: bool,
        descendant: bool,
        expr: String,
    },
}

fn classify(offset: usize, text: &str) -> Result<RawSegment, ParseError> {
    if let Some(slashes) = leading_url_op(text) {
        let inner = url_inner(text, slashes);
        let quoted = inner.trim_start().starts_with('\'') || inner.trim_start().starts_with('"');

        if quoted && slashes > 0 {
            return Err(ParseError::new(
                offset,
                format!(
                    "url() segment cannot have a string literal argument \
                     and preceding navigation slashes: {text}"
                ),
            ));
        }
        if quoted {
            let (url, follow, depth) = parse_url_literal_args(offset, inner)?;
            return Ok(RawSegment::UrlLit {
                offset,
                url,
                follow,
                depth,
            });
        }
        let arg = inner.trim().to_string();
        if arg.is_empty() {
            return Err(ParseError::new(offset, "url() requires an argument"));
        }
        return Ok(RawSegment::UrlOp {
            offset,
            slashes,
            arg,
        });
    }

    if text.starts_with("///") {
        return Err(ParseError::new(
            offset,
            format!("xpath segment cannot have preceding triple slashes: {text}"),
        ));
    }

    let trimmed = text.trim_end();
    if let Some(expr) = trimmed.strip_suffix("||") {
        return Ok(RawSegment::BinaryTail {
            offset,
            op: SegmentOp::Concat,
            expr: expr.trim_end().to_string(),
        });
    }
    if trimmed.ends_with('!') && !trimmed.ends_with("!=") {
        return Ok(RawSegment::BinaryTail {
            offset,
            op: SegmentOp::Map,
            expr: trimmed[..trimmed.len() - 1].trim_end().to_string(),
        });
    }

    if let Some(entries) = try_map_literal(trimmed) {
        return Ok(RawSegment::MapLit { offset, entries });
    }

    Ok(RawSegment::Xpath {
        offset,
        expr: trimmed.to_string(),
    })
}

fn leading_url_op(text: &str) -> Option<usize> {
    let slashes = text.bytes().take(3).take_while(|&b| b == b'/').count();
    text[slashes..].starts_with("url(").then_some(slashes)
}

/// The argument text inside `url( ... )`.
fn url_inner(text: &str, slashes: usize) -> &str {
    let start = slashes + 4;
    &text[start..text.len() - 1]
}

fn parse_url_literal_args(
    offset: usize,
    inner: &str,
) -> Result<(String, Option<String>, Option<usize>), ParseError> {
    let parts = split_top_level_commas(offset, inner)?;
    if parts.is_empty() {
        return Err(ParseError::new(offset, "url() requires at least one argument"));
    }

    let target = parts[0].trim();
    let url = strip_quotes(target)
        .ok_or_else(|| ParseError::new(offset, "url() target must be a string literal"))?
        .to_string();
    if url.is_empty() {
        return Err(ParseError::new(offset, "url() target cannot be empty"));
    }

    let mut follow = None;
    let mut depth = None;
    for part in &parts[1..] {
        let Some((name, value)) = part.split_once('=') else {
            return Err(ParseError::new(
                offset,
                format!("expected keyword argument in url(), got: {part}"),
            ));
        };
        let name = name.trim();
        let value = value.trim();
        if value.is_empty() {
            return Err(ParseError::new(
                offset,
                format!("empty value for url() argument '{name}'"),
            ));
        }
        match name {
            "follow" => {
                if follow.is_some() {
                    return Err(ParseError::new(offset, "duplicate follow= in url()"));
                }
                follow = Some(value.to_string());
            }
            "depth" => {
                if depth.is_some() {
                    return Err(ParseError::new(offset, "duplicate depth= in url()"));
                }
                let parsed = value.parse::<usize>().map_err(|_| {
                    ParseError::new(offset, format!("depth= must be a non-negative integer, got: {value}"))
                })?;
                depth = Some(parsed);
            }
            other => {
                return Err(ParseError::new(
                    offset,
                    format!("unknown url() argument: {other}"),
                ));
            }
        }
    }
    Ok((url, follow, depth))
}

fn strip_quotes(text: &str) -> Option<&str> {
    let text = text.trim();
    if text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
    {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

fn split_top_level_commas(offset: usize, src: &str) -> Result<Vec<String>, ParseError> {
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in src.chars() {
        if let Some(q) = quote {
            buf.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                buf.push(ch);
            }
            '(' | '[' | '{' => {
                depth += 1;
                buf.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError::new(offset, "unbalanced brackets in url()"));
                }
                buf.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(buf.trim().to_string());
                buf.clear();
            }
            _ => buf.push(ch),
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(ParseError::new(offset, "unbalanced expression in url()"));
    }
    if !buf.trim().is_empty() {
        parts.push(buf.trim().to_string());
    }
    Ok(parts)
}

/// Recognises a partition that is a bare map constructor, optionally
/// behind a single separating slash. Dynamic keys fall back to a plain
/// XPath segment.
fn try_map_literal(text: &str) -> Option<Vec<(String, String)>> {
    let body = text.strip_prefix('/').unwrap_or(text).trim_start();
    let inner = body.strip_prefix("map{")?.strip_suffix('}')?;

    let parts = split_top_level_commas(0, inner).ok()?;
    let mut entries = Vec::new();
    for part in parts {
        let part = part.trim();
        let quote = part.chars().next()?;
        if quote != '\'' && quote != '"' {
            return None;
        }
        let rest = &part[1..];
        let close = rest.find(quote)?;
        let key = rest[..close].to_string();
        let after = rest[close + 1..].trim_start();
        let value = after.strip_prefix(':')?.trim();
        if value.is_empty() {
            return None;
        }
        entries.push((key, value.to_string()));
    }
    if entries.is_empty() {
        return None;
    }
    Some(entries)
}

// ---------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------

/// Rewrites `<xpath>/url(.)` into the prefixed form so the dispatcher
/// only ever sees `/url(x)`, `//url(x)`, and `///url(x)`.
fn merge_trailing_url_dot(raw: Vec<RawSegment>) -> Vec<RawSegment> {
    let mut out: Vec<RawSegment> = Vec::with_capacity(raw.len());
    for segment in raw {
        let mergeable = matches!(
            &segment,
            RawSegment::UrlOp { arg, .. } if arg == "." || arg == "self::node()"
        );
        if mergeable {
            if let Some(RawSegment::Xpath { .. }) = out.last() {
                let Some(RawSegment::Xpath { offset, expr }) = out.pop() else {
                    unreachable!()
                };
                let RawSegment::UrlOp { slashes, .. } = segment else {
                    unreachable!()
                };
                out.push(RawSegment::MergedUrl {
                    offset,
                    deep: slashes == 3,
                    descendant: expr.starts_with("//"),
                    expr,
                });
                continue;
            }
        }
        out.push(segment);
    }
    out
}

/// Axis normalisation: anchor a url-op argument to the context.
fn normalize_arg(descendant: bool, raw: &str) -> String {
    let raw = raw.trim();
    if raw == "." || raw == "self::node()" || raw.starts_with('.') {
        raw.to_string()
    } else if raw.starts_with('/') {
        format!(".{raw}")
    } else if descendant {
        format!(".//{raw}")
    } else {
        format!("./{raw}")
    }
}

// ---------------------------------------------------------------------
// Build & validate
// ---------------------------------------------------------------------

fn build(raw: Vec<RawSegment>) -> Result<Program, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::new(0, "empty wxpath expression"));
    }

    let mut segments: Vec<Segment> = Vec::with_capacity(raw.len());
    let mut deep_count = 0usize;

    for (index, segment) in raw.into_iter().enumerate() {
        let built = match segment {
            RawSegment::UrlLit {
                offset,
                url,
                follow,
                depth,
            } => {
                if index != 0 {
                    return Err(ParseError::new(
                        offset,
                        "only one url() with a string literal argument is allowed",
                    ));
                }
                let follow = follow
                    .map(|f| compile_at(offset, &normalize_arg(true, &f)))
                    .transpose()?;
                if follow.is_some() {
                    deep_count += 1;
                }
                Segment::UrlLit(UrlLit {
                    url,
                    follow,
                    depth_cap: depth,
                })
            }
            RawSegment::UrlOp {
                offset,
                slashes,
                arg,
            } => {
                if index == 0 {
                    return Err(ParseError::new(
                        offset,
                        "expression cannot start with url(<xpath>); the first segment \
                         must be a url('...') literal",
                    ));
                }
                check_inner_axis(offset, segments.last(), &arg)?;
                let descendant = slashes >= 2;
                let xpath = compile_at(offset, &normalize_arg(descendant, &arg))?;
                if slashes == 3 {
                    deep_count += 1;
                    Segment::UrlDeep { xpath }
                } else {
                    let axis = if descendant {
                        UrlAxis::Descendant
                    } else {
                        UrlAxis::Child
                    };
                    Segment::UrlEval { axis, xpath }
                }
            }
            RawSegment::MergedUrl {
                offset,
                deep,
                descendant,
                expr,
            } => {
                let xpath = compile_at(offset, &normalize_arg(descendant, &expr))?;
                if deep {
                    deep_count += 1;
                    Segment::UrlDeep { xpath }
                } else {
                    let axis = if descendant {
                        UrlAxis::Descendant
                    } else {
                        UrlAxis::Child
                    };
                    Segment::UrlEval { axis, xpath }
                }
            }
            RawSegment::Xpath { offset, expr } => Segment::Xpath(compile_at(offset, &expr)?),
            RawSegment::BinaryTail { offset, op, expr } => {
                if op == SegmentOp::Concat {
                    return Err(ParseError::new(
                        offset,
                        "'||' must join XPath operands within one expression",
                    ));
                }
                Segment::Binary {
                    op,
                    expr: compile_at(offset, &expr)?,
                }
            }
            RawSegment::MapLit { offset, entries } => {
                let mut compiled = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    compiled.push((key, compile_at(offset, &value)?));
                }
                Segment::MapLit(compiled)
            }
        };
        segments.push(built);
    }

    // I2: the program starts with the seed literal.
    if !matches!(segments.first(), Some(Segment::UrlLit(_))) {
        return Err(ParseError::new(
            0,
            "expression must start with url('...')",
        ));
    }

    // I4: at most one deep crawl, counting follow=.
    if deep_count > 1 {
        return Err(ParseError::new(
            0,
            "only one deep crawl (///url() or follow=) is allowed",
        ));
    }

    if let Some(Segment::Binary { .. }) = segments.last() {
        return Err(ParseError::new(0, "expression cannot end with '!'"));
    }

    // `!` feeds items into the next segment; only a one-hop url() can
    // consume them.
    for window in segments.windows(2) {
        if matches!(window[0], Segment::Binary { .. })
            && !matches!(window[1], Segment::UrlEval { .. } | Segment::Xpath(_))
        {
            return Err(ParseError::new(
                0,
                "'!' must be followed by an XPath or a one-hop url() segment",
            ));
        }
    }

    Ok(Program::new(segments))
}

/// I3: a url(<xpath>) that follows an extraction segment narrows that
/// segment's output, so an absolute inner path is meaningless.
fn check_inner_axis(
    offset: usize,
    previous: Option<&Segment>,
    arg: &str,
) -> Result<(), ParseError> {
    let follows_extraction = matches!(
        previous,
        Some(Segment::Xpath(_) | Segment::Binary { .. } | Segment::MapLit(_))
    );
    if follows_extraction && arg.trim_start().starts_with('/') {
        return Err(ParseError::new(
            offset,
            format!(
                "url() following an extraction segment cannot use an absolute path: {arg}"
            ),
        ));
    }
    Ok(())
}

fn compile_at(offset: usize, source: &str) -> Result<CompiledXPath, ParseError> {
    CompiledXPath::compile(source)
        .map_err(|e| ParseError::new(offset + e.position, e.message))
}
