//! Filtergraph escaping.
//!
//! A value embedded in `-vf` passes through up to three unescaping layers:
//! the graph parser (splits on `,;[]`), the filter option parser (splits on
//! `:`) and, for drawtext text, the text expander (`%{...}` sequences).
//! Each helper below escapes for every layer its value crosses, innermost
//! first.

/// Escapes for the drawtext expander: `\`, `%`, `{` and `}`
fn escape_expansion(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes for the option parser: `\`, `'` and `:`
fn escape_option(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes for the graph parser: `\`, `'`, `,`, `;`, `[` and `]`
fn escape_graph(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '\'' | ',' | ';' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes caption text for `drawtext=text=...`.
///
/// Untrusted transcript text can never terminate the option, start a new
/// filter or trigger `%{...}` expansion. Newlines are flattened to spaces.
pub fn escape_drawtext_text(raw: &str) -> String {
    let flattened: String = raw
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    escape_graph(&escape_option(&escape_expansion(&flattened)))
}

/// Escapes a filesystem path or free-form value used as a filter option
pub fn escape_filter_path(raw: &str) -> String {
    escape_graph(&escape_option(raw))
}
