//! Tokenizer for the VHDL subset BSDL is written in.
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Str(String),
    Int(u64),
    Real(f64),
    Sym(char),
    /// `:=`
    Assign,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    let mut line = 1;
    let mut depth: usize = 0;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '-' if chars.peek() == Some(&'-') => {
                // Comment runs to the end of the line
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            s.push('"');
                        }
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(Error::bsdl(line, "unterminated string literal"));
                        }
                        Some(c) => s.push(c),
                    }
                }
                tokens.push(Token { tok: Tok::Str(s), line });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        s.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token { tok: Tok::Ident(s), line });
            }
            c if c.is_ascii_digit() => {
                let mut s = String::from(c);
                let mut real = false;
                while let Some(&n) = chars.peek() {
                    let exponent_sign = (n == '+' || n == '-')
                        && real
                        && s.ends_with(['e', 'E']);
                    if n.is_ascii_digit() || exponent_sign {
                        s.push(n);
                    } else if n == '_' {
                        // VHDL digit separator
                    } else if n == '.' || n == 'e' || n == 'E' {
                        real = true;
                        s.push(n);
                    } else {
                        break;
                    }
                    chars.next();
                }
                let tok = if real {
                    s.parse::<f64>()
                        .map(Tok::Real)
                        .map_err(|_| Error::bsdl(line, format!("bad number `{}`", s)))?
                } else {
                    s.parse::<u64>()
                        .map(Tok::Int)
                        .map_err(|_| Error::bsdl(line, format!("bad number `{}`", s)))?
                };
                tokens.push(Token { tok, line });
            }
            ':' if chars.peek() == Some(&'=') => {
                chars.next();
                tokens.push(Token { tok: Tok::Assign, line });
            }
            '(' => {
                depth += 1;
                tokens.push(Token { tok: Tok::Sym(c), line });
            }
            ')' => {
                if depth == 0 {
                    return Err(Error::bsdl(line, "unbalanced parentheses: unexpected `)`"));
                }
                depth -= 1;
                tokens.push(Token { tok: Tok::Sym(c), line });
            }
            ',' | ';' | ':' | '&' | '.' | '*' | '/' | '=' | '<' | '>' | '+' | '-' | '\'' => {
                tokens.push(Token { tok: Tok::Sym(c), line });
            }
            c => return Err(Error::bsdl(line, format!("unexpected character `{}`", c))),
        }
    }

    if depth != 0 {
        return Err(Error::bsdl(line, format!("unbalanced parentheses: {} left open", depth)));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn attribute_statement() {
        assert_eq!(
            toks("attribute BOUNDARY_LENGTH of X : entity is 12;"),
            vec![
                Tok::Ident("attribute".into()),
                Tok::Ident("BOUNDARY_LENGTH".into()),
                Tok::Ident("of".into()),
                Tok::Ident("X".into()),
                Tok::Sym(':'),
                Tok::Ident("entity".into()),
                Tok::Ident("is".into()),
                Tok::Int(12),
                Tok::Sym(';'),
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let t = tokenize("-- header\n  \"a\" & -- trailing\n \"b\"").unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t[0].line, 2);
        assert_eq!(t[2].line, 3);
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("10.0e6 1_000 2"), vec![Tok::Real(10.0e6), Tok::Int(1000), Tok::Int(2)]);
    }

    #[test]
    fn generic_default() {
        assert_eq!(
            toks("P : string := \"LQFP\""),
            vec![
                Tok::Ident("P".into()),
                Tok::Sym(':'),
                Tok::Ident("string".into()),
                Tok::Assign,
                Tok::Str("LQFP".into()),
            ]
        );
    }

    #[test]
    fn unbalanced() {
        assert!(matches!(tokenize("port ((a : in bit);"), Err(Error::MalformedBsdl { .. })));
        assert!(matches!(tokenize("port (a : in bit));"), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("x is \"abc\n\"").unwrap_err();
        assert!(matches!(err, Error::MalformedBsdl { line: 1, .. }));
    }
}
