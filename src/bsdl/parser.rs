//! Statement-level parser: turns the token stream into an `Entity` holding the raw generic, port,
//! attribute and constant declarations.  Interpreting attribute strings is left to the caller.
use crate::bsdl::lexer::{Tok, Token};
use crate::bsdl::PortMode;
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Text(String),
    Int(u64),
    Real(f64),
    Ident(String),
    Group(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PortDecl {
    pub name: String,
    pub mode: PortMode,
    /// `(first, last)` of a `bit_vector`, in declaration order
    pub range: Option<(u64, u64)>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Attribute {
    pub name: String,
    pub target: String,
    pub class: String,
    pub value: Value,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Constant {
    pub name: String,
    pub value: Value,
    pub line: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Entity {
    pub name: String,
    pub line: usize,
    pub generics: Vec<(String, Option<Value>)>,
    pub ports: Vec<PortDecl>,
    pub has_port_clause: bool,
    pub uses: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub constants: Vec<Constant>,
}

struct Parser<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Tok> {
        self.toks.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map_or(1, |t| t.line)
    }

    fn next(&mut self) -> Result<&'a Tok> {
        let tok = self
            .toks
            .get(self.pos)
            .ok_or_else(|| Error::bsdl(self.line(), "unexpected end of file"))?;
        self.pos += 1;
        Ok(&tok.tok)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn is_sym(&self, c: char) -> bool {
        self.peek() == Some(&Tok::Sym(c))
    }

    fn expect_sym(&mut self, c: char) -> Result<()> {
        let line = self.line();
        match self.next()? {
            Tok::Sym(s) if *s == c => Ok(()),
            other => Err(Error::bsdl(line, format!("expected `{}`, found {}", c, describe(other)))),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        let line = self.line();
        match self.next()? {
            Tok::Ident(s) if s.eq_ignore_ascii_case(kw) => Ok(()),
            other => Err(Error::bsdl(line, format!("expected `{}`, found {}", kw, describe(other)))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        let line = self.line();
        match self.next()? {
            Tok::Ident(s) => Ok(s.clone()),
            other => Err(Error::bsdl(line, format!("expected a name, found {}", describe(other)))),
        }
    }

    fn int(&mut self) -> Result<u64> {
        let line = self.line();
        match self.next()? {
            Tok::Int(n) => Ok(*n),
            other => Err(Error::bsdl(line, format!("expected a number, found {}", describe(other)))),
        }
    }

    fn value(&mut self) -> Result<Value> {
        let mut value = self.term()?;
        while self.is_sym('&') {
            let line = self.line();
            self.pos += 1;
            let rhs = self.term()?;
            value = match (value, rhs) {
                (Value::Text(mut a), Value::Text(b)) => {
                    a.push_str(&b);
                    Value::Text(a)
                }
                _ => return Err(Error::bsdl(line, "`&` can only join strings")),
            };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<Value> {
        let line = self.line();
        match self.next()? {
            Tok::Str(s) => Ok(Value::Text(s.clone())),
            Tok::Int(n) => Ok(Value::Int(*n)),
            Tok::Real(r) => Ok(Value::Real(*r)),
            Tok::Ident(s) => Ok(Value::Ident(s.clone())),
            Tok::Sym('(') => {
                let mut items = vec![self.value()?];
                while self.is_sym(',') {
                    self.pos += 1;
                    items.push(self.value()?);
                }
                self.expect_sym(')')?;
                Ok(Value::Group(items))
            }
            other => Err(Error::bsdl(line, format!("expected a value, found {}", describe(other)))),
        }
    }

    fn generic_clause(&mut self, entity: &mut Entity) -> Result<()> {
        self.expect_sym('(')?;
        loop {
            let name = self.ident()?;
            self.expect_sym(':')?;
            self.ident()?;
            let default = if self.peek() == Some(&Tok::Assign) {
                self.pos += 1;
                Some(self.value()?)
            } else {
                None
            };
            entity.generics.push((name, default));
            if self.is_sym(';') {
                self.pos += 1;
                continue;
            }
            break;
        }
        self.expect_sym(')')?;
        self.expect_sym(';')
    }

    fn port_clause(&mut self, entity: &mut Entity) -> Result<()> {
        self.expect_sym('(')?;
        loop {
            let line = self.line();
            let mut names = vec![self.ident()?];
            while self.is_sym(',') {
                self.pos += 1;
                names.push(self.ident()?);
            }
            self.expect_sym(':')?;
            let mode_line = self.line();
            let mode = self.ident()?;
            let mode = PortMode::from_keyword(&mode).ok_or_else(|| {
                Error::bsdl(mode_line, format!("unknown pin direction `{}`", mode))
            })?;
            let ty_line = self.line();
            let ty = self.ident()?;
            let range = if ty.eq_ignore_ascii_case("bit") {
                None
            } else if ty.eq_ignore_ascii_case("bit_vector") {
                self.expect_sym('(')?;
                let first = self.int()?;
                let dir_line = self.line();
                let dir = self.ident()?;
                if !dir.eq_ignore_ascii_case("to") && !dir.eq_ignore_ascii_case("downto") {
                    return Err(Error::bsdl(dir_line, format!("expected `to` or `downto`, found `{}`", dir)));
                }
                let last = self.int()?;
                self.expect_sym(')')?;
                Some((first, last))
            } else {
                return Err(Error::bsdl(ty_line, format!("unsupported port type `{}`", ty)));
            };
            for name in names {
                entity.ports.push(PortDecl { name, mode, range, line });
            }
            if self.is_sym(';') {
                self.pos += 1;
                continue;
            }
            break;
        }
        self.expect_sym(')')?;
        entity.has_port_clause = true;
        self.expect_sym(';')
    }

    fn attribute(&mut self, entity: &mut Entity) -> Result<()> {
        let line = self.line();
        let name = self.ident()?;
        self.expect_keyword("of")?;
        let target = self.ident()?;
        self.expect_sym(':')?;
        let class = self.ident()?;
        self.expect_keyword("is")?;
        let value = self.value()?;
        self.expect_sym(';')?;
        entity.attributes.push(Attribute { name, target, class, value, line });
        Ok(())
    }

    fn constant(&mut self, entity: &mut Entity) -> Result<()> {
        let line = self.line();
        let name = self.ident()?;
        self.expect_sym(':')?;
        self.ident()?;
        if self.peek() != Some(&Tok::Assign) {
            return Err(Error::bsdl(self.line(), "expected `:=` in constant declaration"));
        }
        self.pos += 1;
        let value = self.value()?;
        self.expect_sym(';')?;
        entity.constants.push(Constant { name, value, line });
        Ok(())
    }

    fn use_clause(&mut self, entity: &mut Entity) -> Result<()> {
        let mut name = self.ident()?;
        while self.is_sym('.') {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.ident()?);
        }
        self.expect_sym(';')?;
        entity.uses.push(name);
        Ok(())
    }

    fn entity(&mut self) -> Result<Entity> {
        if !self.is_keyword("entity") {
            return Err(Error::bsdl(self.line(), "missing entity declaration"));
        }
        let mut entity = Entity {
            line: self.line(),
            ..Entity::default()
        };
        self.pos += 1;
        entity.name = self.ident()?;
        self.expect_keyword("is")?;

        loop {
            let line = self.line();
            let keyword = match self.peek() {
                Some(Tok::Ident(s)) => s.to_ascii_lowercase(),
                Some(other) => {
                    return Err(Error::bsdl(line, format!("unexpected {}", describe(other))));
                }
                None => return Err(Error::bsdl(line, "missing `end` of entity")),
            };
            self.pos += 1;
            match keyword.as_str() {
                "generic" => self.generic_clause(&mut entity)?,
                "port" => self.port_clause(&mut entity)?,
                "use" => self.use_clause(&mut entity)?,
                "attribute" => self.attribute(&mut entity)?,
                "constant" => self.constant(&mut entity)?,
                "end" => {
                    if let Some(Tok::Ident(name)) = self.peek() {
                        if !name.eq_ignore_ascii_case(&entity.name) {
                            return Err(Error::bsdl(
                                self.line(),
                                format!("`end {}` closes entity `{}`", name, entity.name),
                            ));
                        }
                        self.pos += 1;
                    }
                    if self.is_sym(';') {
                        self.pos += 1;
                    }
                    return Ok(entity);
                }
                other => return Err(Error::bsdl(line, format!("unexpected `{}`", other))),
            }
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(s) => format!("`{}`", s),
        Tok::Str(s) => format!("string \"{}\"", s),
        Tok::Int(n) => format!("number {}", n),
        Tok::Real(r) => format!("number {}", r),
        Tok::Sym(c) => format!("`{}`", c),
        Tok::Assign => "`:=`".to_string(),
    }
}

pub(crate) fn parse_entity(tokens: &[Token]) -> Result<Entity> {
    let mut parser = Parser { toks: tokens, pos: 0 };
    parser.entity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsdl::lexer::tokenize;

    fn entity(src: &str) -> Result<Entity> {
        parse_entity(&tokenize(src)?)
    }

    #[test]
    fn ports_and_attributes() {
        let e = entity(
            "entity CHIP is
               generic (PHYSICAL_PIN_MAP : string := \"QFN\");
               port (TCK, TMS : in bit; TDO : out bit; D : inout bit_vector(3 downto 0));
               use STD_1149_1_2001.all;
               attribute INSTRUCTION_LENGTH of CHIP : entity is 4;
               attribute TAP_SCAN_CLOCK of TCK : signal is (10.0e6, BOTH);
               constant QFN : PIN_MAP_STRING := \"TCK:1,\" & \"TMS:2\";
             end CHIP;",
        )
        .unwrap();
        assert_eq!(e.name, "CHIP");
        assert_eq!(e.ports.len(), 4);
        assert_eq!(e.ports[1].name, "TMS");
        assert_eq!(e.ports[3].range, Some((3, 0)));
        assert_eq!(e.ports[3].mode, PortMode::InOut);
        assert_eq!(e.uses, vec!["STD_1149_1_2001.all".to_string()]);
        assert_eq!(e.attributes[0].value, Value::Int(4));
        assert_eq!(
            e.attributes[1].value,
            Value::Group(vec![Value::Real(10.0e6), Value::Ident("BOTH".into())])
        );
        assert_eq!(e.constants[0].value, Value::Text("TCK:1,TMS:2".into()));
        assert_eq!(e.generics[0].1, Some(Value::Text("QFN".into())));
    }

    #[test]
    fn unknown_direction() {
        let err = entity("entity X is port (A : sideways bit); end X;").unwrap_err();
        match err {
            Error::MalformedBsdl { message, .. } => assert!(message.contains("sideways")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_end() {
        assert!(entity("entity X is port (A : in bit);").is_err());
    }

    #[test]
    fn mismatched_end() {
        assert!(entity("entity X is end Y;").is_err());
    }

    #[test]
    fn missing_semicolon() {
        assert!(entity("entity X is attribute A of X : entity is 1 end X;").is_err());
    }
}
