//! Small utility helpers used across modules.

/// Named entities the public trivia API is known to emit.
const NAMED_ENTITIES: &[(&str, &str)] = &[
  ("quot", "\""),
  ("apos", "'"),
  ("amp", "&"),
  ("lt", "<"),
  ("gt", ">"),
  ("nbsp", " "),
  ("rsquo", "\u{2019}"),
  ("lsquo", "\u{2018}"),
  ("rdquo", "\u{201D}"),
  ("ldquo", "\u{201C}"),
  ("hellip", "\u{2026}"),
  ("ndash", "\u{2013}"),
  ("mdash", "\u{2014}"),
  ("shy", "\u{00AD}"),
  ("eacute", "é"),
  ("Eacute", "É"),
  ("egrave", "è"),
  ("aacute", "á"),
  ("iacute", "í"),
  ("oacute", "ó"),
  ("uacute", "ú"),
  ("ntilde", "ñ"),
  ("ccedil", "ç"),
  ("uuml", "ü"),
  ("ouml", "ö"),
  ("auml", "ä"),
  ("Uuml", "Ü"),
  ("Ouml", "Ö"),
  ("Auml", "Ä"),
  ("szlig", "ß"),
];

/// Decode HTML character references: the named table above plus `&#NNN;` and `&#xHH;`.
/// Unknown or malformed references are copied through verbatim.
pub fn decode_html_entities(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut rest = text;
  while let Some(amp) = rest.find('&') {
    out.push_str(&rest[..amp]);
    let tail = &rest[amp..];
    // Entities are short; don't scan the whole string for a stray '&'.
    let semi = tail.char_indices().take(12).find(|(_, c)| *c == ';').map(|(i, _)| i);
    match semi.and_then(|end| decode_reference(&tail[1..end]).map(|s| (s, end))) {
      Some((decoded, end)) => {
        out.push_str(&decoded);
        rest = &tail[end + 1..];
      }
      None => {
        out.push('&');
        rest = &tail[1..];
      }
    }
  }
  out.push_str(rest);
  out
}

fn decode_reference(body: &str) -> Option<String> {
  if let Some(num) = body.strip_prefix('#') {
    let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
      Some(hex) => u32::from_str_radix(hex, 16).ok()?,
      None => num.parse::<u32>().ok()?,
    };
    return char::from_u32(code).map(String::from);
  }
  NAMED_ENTITIES.iter().find(|(name, _)| *name == body).map(|(_, v)| v.to_string())
}

/// Log-safe truncation for large strings.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
