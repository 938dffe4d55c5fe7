// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Locale independent number formatting and parsing with C semantics.

const G_PRECISION: i32 = 6;

/// Formats like C `printf("%g", v)`.
pub fn format_g(v: f64) -> String {
    if let Some(s) = non_finite(v) {
        return s;
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // The exponent after rounding to the target precision decides the style.
    let sci = format!("{:.*e}", (G_PRECISION - 1) as usize, v);
    let (mantissa, exp) = split_exponent(&sci);

    if exp < -4 || exp >= G_PRECISION {
        format!("{}e{}", strip_zeros(mantissa), c_exponent(exp))
    } else {
        let decimals = (G_PRECISION - 1 - exp) as usize;
        strip_zeros(&format!("{v:.decimals$}")).to_string()
    }
}

/// Formats like C `printf("%Le", v)`.
pub fn format_le(v: f64) -> String {
    if let Some(s) = non_finite(v) {
        return s;
    }
    let sci = format!("{v:.6e}");
    let (mantissa, exp) = split_exponent(&sci);
    format!("{mantissa}e{}", c_exponent(exp))
}

fn non_finite(v: f64) -> Option<String> {
    if v.is_nan() {
        Some(if v.is_sign_negative() { "-nan" } else { "nan" }.to_string())
    } else if v.is_infinite() {
        Some(if v < 0.0 { "-inf" } else { "inf" }.to_string())
    } else {
        None
    }
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((m, e)) => (m, e.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

fn c_exponent(exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{sign}{:02}", exp.unsigned_abs())
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn skip_space(text: &[u8]) -> usize {
    text.iter().take_while(|b| b.is_ascii_whitespace()).count()
}

/// Parses the longest integer prefix of `text`.
///
/// Accepts leading whitespace, a sign and a `0x`/`0X` prefix for base 16;
/// otherwise base 10. Returns the value (clamped into `i128`) and the number
/// of bytes consumed, or `None` if no digits were found.
pub fn parse_int_prefix(text: &[u8]) -> Option<(i128, usize)> {
    let mut pos = skip_space(text);
    let mut negative = false;
    if let Some(&b) = text.get(pos) {
        if b == b'+' || b == b'-' {
            negative = b == b'-';
            pos += 1;
        }
    }

    let mut radix = 10;
    if text.get(pos) == Some(&b'0')
        && matches!(text.get(pos + 1), Some(b'x' | b'X'))
        && text.get(pos + 2).is_some_and(u8::is_ascii_hexdigit)
    {
        radix = 16;
        pos += 2;
    }

    let start = pos;
    let mut acc: i128 = 0;
    while let Some(d) = text.get(pos).and_then(|b| char::from(*b).to_digit(radix)) {
        acc = acc
            .saturating_mul(i128::from(radix))
            .saturating_add(i128::from(d));
        pos += 1;
    }
    if pos == start {
        return None;
    }
    Some((if negative { -acc } else { acc }, pos))
}

/// Parses the longest floating point prefix of `text`.
///
/// Accepts leading whitespace, a sign, decimal digits with an optional
/// fraction and exponent, and `inf`, `infinity` or `nan` in any case.
pub fn parse_float_prefix(text: &[u8]) -> Option<(f64, usize)> {
    let lead = skip_space(text);
    let mut pos = lead;
    let mut negative = false;
    if let Some(&b) = text.get(pos) {
        if b == b'+' || b == b'-' {
            negative = b == b'-';
            pos += 1;
        }
    }

    let rest = &text[pos..];
    for (word, value) in [
        ("infinity", f64::INFINITY),
        ("inf", f64::INFINITY),
        ("nan", f64::NAN),
    ] {
        if rest.len() >= word.len() && rest[..word.len()].eq_ignore_ascii_case(word.as_bytes()) {
            let v = if negative { -value } else { value };
            return Some((v, pos + word.len()));
        }
    }

    let digits = |from: usize| text[from..].iter().take_while(|b| b.is_ascii_digit()).count();

    let int_digits = digits(pos);
    pos += int_digits;
    let mut frac_digits = 0;
    if text.get(pos) == Some(&b'.') {
        frac_digits = digits(pos + 1);
        if int_digits > 0 || frac_digits > 0 {
            pos += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(text.get(pos), Some(b'e' | b'E')) {
        let mut epos = pos + 1;
        if matches!(text.get(epos), Some(b'+' | b'-')) {
            epos += 1;
        }
        let exp_digits = digits(epos);
        if exp_digits > 0 {
            pos = epos + exp_digits;
        }
    }

    let literal = std::str::from_utf8(&text[lead..pos]).ok()?;
    literal.parse::<f64>().ok().map(|v| (v, pos))
}
