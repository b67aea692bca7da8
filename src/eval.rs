//! Represents command templates with embedded variable references, e.g.
//! `cc -c $(>) -o $(<) $(cflags)`, and mechanisms for expanding those into
//! plain strings.
//!
//! References are written `$(name)`.  Besides ordinary names, the recipe
//! environment understands `<` and `>` (all targets / all sources) and the
//! indexed forms `<[N]` and `>[N]`.  A reference no environment knows about is
//! left in the output untouched.

use std::borrow::Cow;

/// An environment providing a mapping of variable name to variable value.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<'a> {
    Literal(&'a str),
    /// The name inside `$( )`, along with the full reference text.
    VarRef { name: &'a str, text: &'a str },
}

/// Splits a template into its parts.
pub struct EvalParser<'a> {
    rest: &'a str,
}

impl<'a> EvalParser<'a> {
    pub fn new(text: &'a str) -> Self {
        EvalParser { rest: text }
    }
}

impl<'a> Iterator for EvalParser<'a> {
    type Item = EvalPart<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let start = match self.rest.find("$(") {
            Some(0) => 0,
            Some(ofs) => {
                let (lit, rest) = self.rest.split_at(ofs);
                self.rest = rest;
                return Some(EvalPart::Literal(lit));
            }
            None => {
                let lit = self.rest;
                self.rest = "";
                return Some(EvalPart::Literal(lit));
            }
        };
        match self.rest[start..].find(')') {
            Some(end) => {
                let text = &self.rest[..end + 1];
                self.rest = &self.rest[end + 1..];
                Some(EvalPart::VarRef {
                    name: &text[2..end],
                    text,
                })
            }
            None => {
                // Unterminated reference, keep it verbatim.
                let lit = self.rest;
                self.rest = "";
                Some(EvalPart::Literal(lit))
            }
        }
    }
}

/// A parsed but unexpanded command template.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(T);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(inner: T) -> Self {
        EvalString(inner)
    }

    pub fn parse(&self) -> EvalParser {
        EvalParser::new(self.0.as_ref())
    }

    /// Names of all variables referenced by the template.
    pub fn var_refs(&self) -> impl Iterator<Item = &str> {
        self.parse().filter_map(|part| match part {
            EvalPart::VarRef { name, .. } => Some(name),
            EvalPart::Literal(_) => None,
        })
    }

    /// Expand the template, looking each variable up in the first Env that
    /// has it.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut result = String::new();
        for part in self.parse() {
            match part {
                EvalPart::Literal(s) => result.push_str(s),
                EvalPart::VarRef { name, text } => {
                    match envs.iter().find_map(|env| env.get_var(name)) {
                        Some(val) => result.push_str(&val),
                        None => result.push_str(text),
                    }
                }
            }
        }
        result
    }
}

/// Split an indexed reference like `<[2]` into its list name and index.
pub fn parse_indexed(var: &str) -> Option<(&str, usize)> {
    let open = var.find('[')?;
    let inner = var[open..].strip_prefix('[')?.strip_suffix(']')?;
    Some((&var[..open], inner.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, &'static str>);
    impl Env for MapEnv {
        fn get_var(&self, var: &str) -> Option<Cow<str>> {
            self.0.get(var).map(|v| Cow::Borrowed(*v))
        }
    }

    #[test]
    fn parts() {
        let parts: Vec<_> = EvalParser::new("cc $(>) -o $(<)").collect();
        assert_eq!(
            parts,
            vec![
                EvalPart::Literal("cc "),
                EvalPart::VarRef {
                    name: ">",
                    text: "$(>)"
                },
                EvalPart::Literal(" -o "),
                EvalPart::VarRef {
                    name: "<",
                    text: "$(<)"
                },
            ]
        );
    }

    #[test]
    fn unknown_and_unterminated_kept() {
        let env = MapEnv(HashMap::from([("x", "1")]));
        let s = EvalString::new("$(x) $(y) $(x");
        assert_eq!(s.evaluate(&[&env]), "1 $(y) $(x");
    }

    #[test]
    fn first_env_wins() {
        let a = MapEnv(HashMap::from([("v", "a")]));
        let b = MapEnv(HashMap::from([("v", "b"), ("w", "b")]));
        let s = EvalString::new("$(v)$(w)");
        assert_eq!(s.evaluate(&[&a, &b]), "ab");
    }

    #[test]
    fn indexed() {
        assert_eq!(parse_indexed("<[0]"), Some(("<", 0)));
        assert_eq!(parse_indexed(">[12]"), Some((">", 12)));
        assert_eq!(parse_indexed("<"), None);
        assert_eq!(parse_indexed("<[x]"), None);
        let es = EvalString::new("cp $(>[1]) $(<[0])");
        let refs: Vec<_> = es.var_refs().collect::<Vec<_>>();
        assert_eq!(refs, [">[1]", "<[0]"]);
    }
}
