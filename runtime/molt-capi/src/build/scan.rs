use crate::context::CapiContext;
use crate::error::ExcKind;

/// Counts the top-level directives in `format` up to `endchar` (`0` is the
/// end of the string). Returns `-1` with `SystemError` pending when the
/// string ends inside a group.
///
/// Only format characters are looked at; no argument is consumed.
pub fn count_format(ctx: &mut CapiContext, format: &[u8], endchar: u8) -> isize {
    let mut count = 0isize;
    let mut level = 0isize;
    let mut pos = 0usize;
    loop {
        let ch = format.get(pos).copied().unwrap_or(0);
        if level <= 0 && ch == endchar {
            return count;
        }
        match ch {
            0 => {
                return ctx.raise_exception(ExcKind::SystemError, "unmatched paren in format");
            }
            b'(' | b'[' | b'{' => {
                if level == 0 {
                    count += 1;
                }
                level += 1;
            }
            b')' | b']' | b'}' => level -= 1,
            b'#' | b'&' | b',' | b':' | b' ' | b'\t' => {}
            _ => {
                if level == 0 {
                    count += 1;
                }
            }
        }
        pos += 1;
    }
}
