//! Tokenizer for XPath expressions

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Dot,
    DotDot,
    Comma,
    Pipe,
    ColonColon,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    /// `*` used as a name test.
    Star,
    /// `*` used as the multiplication operator.
    Multiply,
    And,
    Or,
    Div,
    Mod,
    Name(String),
    Literal(String),
    Number(f64),
}

impl Token {
    /// Whether a `*` or a bare name following this token must be read as an operator.
    ///
    /// XPath 1.0, section 3.7: when there is a preceding token that is not
    /// `@`, `::`, `(`, `[`, `,` or an operator, `*` multiplies and names like
    /// `and` or `div` are operators.
    fn forces_operator(&self) -> bool {
        !matches!(
            self,
            Token::At
                | Token::ColonColon
                | Token::LParen
                | Token::LBracket
                | Token::Comma
                | Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge
                | Token::Multiply
                | Token::And
                | Token::Or
                | Token::Div
                | Token::Mod
        )
    }
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let operator_context = tokens.last().is_some_and(Token::forces_operator);

        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => {
                i += 2;
                Token::DoubleSlash
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '@' => {
                i += 1;
                Token::At
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '=' => {
                i += 1;
                Token::Eq
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::NotEq
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::Le
            }
            '<' => {
                i += 1;
                Token::Lt
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::Ge
            }
            '>' => {
                i += 1;
                Token::Gt
            }
            ':' if next == Some(':') => {
                i += 2;
                Token::ColonColon
            }
            '*' => {
                i += 1;
                if operator_context {
                    Token::Multiply
                } else {
                    Token::Star
                }
            }
            '.' if next == Some('.') => {
                i += 2;
                Token::DotDot
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (number, end) = read_number(&chars, i);
                i = end;
                Token::Number(number)
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|offset| start + offset)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                i = end + 1;
                Token::Literal(chars[start..end].iter().collect())
            }
            c if c.is_ascii_digit() => {
                let (number, end) = read_number(&chars, i);
                i = end;
                Token::Number(number)
            }
            c if is_name_start(c) => {
                let (name, end) = read_name(&chars, i);
                i = end;
                if operator_context {
                    match name.as_str() {
                        "and" => Token::And,
                        "or" => Token::Or,
                        "div" => Token::Div,
                        "mod" => Token::Mod,
                        _ => return Err(format!("expected an operator, found `{name}`")),
                    }
                } else {
                    Token::Name(name)
                }
            }
            other => return Err(format!("unexpected character `{other}`")),
        };

        tokens.push(token);
    }

    Ok(tokens)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn read_number(chars: &[char], start: usize) -> (f64, usize) {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() {
        match chars[end] {
            c if c.is_ascii_digit() => end += 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    let text: String = chars[start..end].iter().collect();
    (text.parse().unwrap_or(f64::NAN), end)
}

/// Read an NCName, or a QName / `prefix:*` when a single colon follows.
fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_name_char(chars[end]) {
        end += 1;
    }

    if chars.get(end) == Some(&':') && chars.get(end + 1) != Some(&':') {
        match chars.get(end + 1) {
            Some('*') => end += 2,
            Some(&c) if is_name_start(c) => {
                end += 1;
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
            }
            _ => {}
        }
    }

    (chars[start..end].iter().collect(), end)
}
