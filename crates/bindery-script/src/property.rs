use crate::ast::Segment;
use crate::error::ParseError;
use crate::lexer::scan_balanced;
use crate::parser::Parser;

/// Splits a markup property value into literal text and `{...}` expression
/// segments. `\{` produces a literal brace.
pub(crate) fn split_segments(source: &str) -> Result<Vec<Segment>, ParseError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut pos = 0;
    while let Some(ch) = source[pos..].chars().next() {
        match ch {
            '\\' if source[pos + 1..].starts_with('{') => {
                literal.push('{');
                pos += 2;
            }
            '{' => {
                let start = pos + 1;
                let end = scan_balanced(source, start)
                    .ok_or_else(|| ParseError::new("unterminated binding expression", pos))?;
                let text = &source[start..end];
                if text.trim().is_empty() {
                    return Err(ParseError::new("empty binding expression", pos));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let expr = Parser::new(text, start)?.parse_complete_expression()?;
                segments.push(Segment::Expression(expr));
                pos = end + 1;
            }
            _ => {
                literal.push(ch);
                pos += ch.len_utf8();
            }
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
