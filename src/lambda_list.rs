// clcore Lambda Lists
//
// Parsing of ordinary and macro lambda lists, and binding of arguments
// against a parsed list. Macro lambda lists destructure nested patterns and
// accept &WHOLE, &BODY, &ENVIRONMENT and a dotted rest variable.

use crate::conditions::Condition;
use crate::environment::Environment;
use crate::eval::{ControlSignal, Interpreter};
use crate::function::Arity;
use crate::symbol::{PackageRegistry, Symbol};
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaListKind {
    Ordinary,
    Macro,
}

/// A parameter position: a variable, or a nested pattern in macro lists.
#[derive(Debug, Clone)]
pub enum Param {
    Var(Symbol),
    Pattern(Box<LambdaList>),
}

#[derive(Debug, Clone)]
pub struct OptionalParam {
    pub param: Param,
    pub init: Value,
    pub supplied: Option<Symbol>,
}

#[derive(Debug, Clone)]
pub struct KeyParam {
    pub keyword: Symbol,
    pub param: Param,
    pub init: Value,
    pub supplied: Option<Symbol>,
}

#[derive(Debug, Clone, Default)]
pub struct LambdaList {
    pub whole: Option<Param>,
    pub environment: Option<Symbol>,
    pub required: Vec<Param>,
    pub optional: Vec<OptionalParam>,
    pub rest: Option<Param>,
    pub key_present: bool,
    pub keys: Vec<KeyParam>,
    pub allow_other_keys: bool,
    pub aux: Vec<(Symbol, Value)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Required,
    Optional,
    Rest,
    AfterRest,
    Key,
    Aux,
    Whole,
    Environment,
}

fn malformed(spec: &Value, what: &str) -> Condition {
    Condition::program_error(format!("Malformed lambda list {}: {}", spec, what))
}

impl LambdaList {
    pub fn parse(
        spec: &Value,
        kind: LambdaListKind,
        packages: &PackageRegistry,
    ) -> Result<Self, Condition> {
        let mut ll = LambdaList::default();
        let mut section = Section::Required;
        let mut resume = Section::Required;
        let mut current = spec.clone();

        loop {
            let item = match current {
                Value::Nil => break,
                Value::Cons(c) => {
                    current = c.cdr();
                    c.car()
                }
                Value::Symbol(s) if kind == LambdaListKind::Macro => {
                    if ll.rest.is_some() {
                        return Err(malformed(spec, "dotted rest after &REST"));
                    }
                    ll.rest = Some(Param::Var(s));
                    break;
                }
                _ => return Err(malformed(spec, "not a proper list")),
            };

            if let Value::Symbol(s) = &item {
                if s.name().starts_with('&') {
                    match s.name() {
                        "&OPTIONAL" if section == Section::Required => section = Section::Optional,
                        "&REST" | "&BODY" if matches!(section, Section::Required | Section::Optional) => {
                            section = Section::Rest
                        }
                        "&KEY" if !matches!(section, Section::Key | Section::Aux | Section::Rest) => {
                            ll.key_present = true;
                            section = Section::Key;
                        }
                        "&ALLOW-OTHER-KEYS" if section == Section::Key => ll.allow_other_keys = true,
                        "&AUX" if section != Section::Rest => section = Section::Aux,
                        "&WHOLE" if kind == LambdaListKind::Macro && ll.whole.is_none() && ll.required.is_empty() => {
                            section = Section::Whole
                        }
                        "&ENVIRONMENT" if kind == LambdaListKind::Macro && ll.environment.is_none() => {
                            resume = section;
                            section = Section::Environment;
                        }
                        other => return Err(malformed(spec, &format!("misplaced {}", other))),
                    }
                    continue;
                }
            }

            match section {
                Section::Required => ll.required.push(Self::parse_param(&item, kind, packages, spec)?),
                Section::Optional => ll.optional.push(Self::parse_optional(&item, kind, packages, spec)?),
                Section::Rest => {
                    ll.rest = Some(Self::parse_param(&item, kind, packages, spec)?);
                    section = Section::AfterRest;
                }
                Section::AfterRest => return Err(malformed(spec, "more than one &REST variable")),
                Section::Key => ll.keys.push(Self::parse_key(&item, kind, packages, spec)?),
                Section::Aux => ll.aux.push(Self::parse_aux(&item, spec)?),
                Section::Whole => {
                    ll.whole = Some(Self::parse_param(&item, kind, packages, spec)?);
                    section = Section::Required;
                }
                Section::Environment => {
                    ll.environment = Some(Self::variable(&item, spec)?);
                    section = resume;
                }
            }
        }

        if matches!(section, Section::Rest | Section::Whole | Section::Environment) {
            return Err(malformed(spec, "lambda list keyword without a variable"));
        }
        Ok(ll)
    }

    fn variable(item: &Value, spec: &Value) -> Result<Symbol, Condition> {
        match item {
            Value::Symbol(s) if !s.is_keyword() => Ok(s.clone()),
            _ => Err(malformed(spec, &format!("{} is not a variable name", item))),
        }
    }

    fn parse_param(
        item: &Value,
        kind: LambdaListKind,
        packages: &PackageRegistry,
        spec: &Value,
    ) -> Result<Param, Condition> {
        match item {
            Value::Cons(_) if kind == LambdaListKind::Macro => {
                Ok(Param::Pattern(Box::new(Self::parse(item, kind, packages)?)))
            }
            _ => Ok(Param::Var(Self::variable(item, spec)?)),
        }
    }

    fn parse_optional(
        item: &Value,
        kind: LambdaListKind,
        packages: &PackageRegistry,
        spec: &Value,
    ) -> Result<OptionalParam, Condition> {
        match item {
            Value::Cons(_) => {
                let parts = item.list_to_vec().ok_or_else(|| malformed(spec, "dotted &OPTIONAL entry"))?;
                if parts.is_empty() || parts.len() > 3 {
                    return Err(malformed(spec, "bad &OPTIONAL entry"));
                }
                Ok(OptionalParam {
                    param: Self::parse_param(&parts[0], kind, packages, spec)?,
                    init: parts.get(1).cloned().unwrap_or(Value::Nil),
                    supplied: parts.get(2).map(|v| Self::variable(v, spec)).transpose()?,
                })
            }
            _ => Ok(OptionalParam {
                param: Param::Var(Self::variable(item, spec)?),
                init: Value::Nil,
                supplied: None,
            }),
        }
    }

    fn parse_key(
        item: &Value,
        kind: LambdaListKind,
        packages: &PackageRegistry,
        spec: &Value,
    ) -> Result<KeyParam, Condition> {
        let parts = match item {
            Value::Cons(_) => item.list_to_vec().ok_or_else(|| malformed(spec, "dotted &KEY entry"))?,
            _ => vec![item.clone()],
        };
        if parts.is_empty() || parts.len() > 3 {
            return Err(malformed(spec, "bad &KEY entry"));
        }
        let (keyword, param) = match &parts[0] {
            Value::Symbol(s) => (packages.intern_keyword(s.name()), Param::Var(Self::variable(&parts[0], spec)?)),
            Value::Cons(_) => {
                let pair = parts[0].list_to_vec().unwrap_or_default();
                match pair.as_slice() {
                    [Value::Symbol(k), var] => (k.clone(), Self::parse_param(var, kind, packages, spec)?),
                    _ => return Err(malformed(spec, "bad ((keyword var)) entry")),
                }
            }
            _ => return Err(malformed(spec, "bad &KEY entry")),
        };
        Ok(KeyParam {
            keyword,
            param,
            init: parts.get(1).cloned().unwrap_or(Value::Nil),
            supplied: parts.get(2).map(|v| Self::variable(v, spec)).transpose()?,
        })
    }

    fn parse_aux(item: &Value, spec: &Value) -> Result<(Symbol, Value), Condition> {
        match item {
            Value::Cons(_) => {
                let parts = item.list_to_vec().ok_or_else(|| malformed(spec, "dotted &AUX entry"))?;
                match parts.as_slice() {
                    [var] => Ok((Self::variable(var, spec)?, Value::Nil)),
                    [var, init] => Ok((Self::variable(var, spec)?, init.clone())),
                    _ => Err(malformed(spec, "bad &AUX entry")),
                }
            }
            _ => Ok((Self::variable(item, spec)?, Value::Nil)),
        }
    }

    /// Argument counts accepted by an ordinary call.
    pub fn arity(&self) -> Arity {
        let min = self.required.len();
        if self.rest.is_some() || self.key_present {
            Arity::at_least(min)
        } else {
            Arity::range(min, min + self.optional.len())
        }
    }
}

// ============================================================================
// Binding
// ============================================================================

impl Interpreter {
    /// Bind evaluated call arguments into `env`. Special bindings are pushed
    /// on the dynamic stack; the caller restores it.
    pub(crate) fn bind_arguments(
        &mut self,
        ll: &LambdaList,
        args: &[Value],
        env: &Environment,
        specials: &[Symbol],
        name: &str,
    ) -> Result<(), ControlSignal> {
        let arity = ll.arity();
        if !arity.accepts(args.len()) {
            return Err(Condition::wrong_number_of_arguments(name, args.len(), arity).into());
        }
        self.bind_sequence(ll, args, None, env, specials, name)
    }

    /// Destructure `form_args` (a list) against a macro lambda list.
    pub(crate) fn bind_destructuring(
        &mut self,
        ll: &LambdaList,
        form_args: &Value,
        whole: &Value,
        lexenv: &Environment,
        env: &Environment,
        specials: &[Symbol],
        name: &str,
    ) -> Result<(), ControlSignal> {
        if let Some(whole_param) = &ll.whole {
            self.bind_param(whole_param, whole.clone(), env, specials, name)?;
        }
        if let Some(env_var) = &ll.environment {
            self.bind_variable(env_var, Value::Environment(lexenv.clone()), env, specials)?;
        }

        let mut items = Vec::new();
        let mut cursor = form_args.clone();
        while let Value::Cons(c) = cursor {
            items.push(c.car());
            cursor = c.cdr();
        }
        if !cursor.is_nil() && ll.rest.is_none() {
            return Err(Condition::program_error(format!(
                "Dotted argument list {} does not match lambda list of {}",
                form_args, name
            ))
            .into());
        }
        let arity = ll.arity();
        if !arity.accepts(items.len()) {
            return Err(Condition::program_error(format!(
                "Error while parsing arguments to {}: {} does not match the lambda list",
                name, form_args
            ))
            .with_datum(whole.clone())
            .into());
        }
        self.bind_sequence(ll, &items, Some(form_args), env, specials, name)
    }

    fn bind_sequence(
        &mut self,
        ll: &LambdaList,
        args: &[Value],
        list: Option<&Value>,
        env: &Environment,
        specials: &[Symbol],
        name: &str,
    ) -> Result<(), ControlSignal> {
        let t = self.t();
        let mut i = 0;

        for param in &ll.required {
            self.bind_param(param, args[i].clone(), env, specials, name)?;
            i += 1;
        }

        for opt in &ll.optional {
            let supplied = i < args.len();
            let value = if supplied {
                i += 1;
                args[i - 1].clone()
            } else {
                self.eval(&opt.init, env)?
            };
            self.bind_param(&opt.param, value, env, specials, name)?;
            if let Some(svar) = &opt.supplied {
                let flag = if supplied { t.clone() } else { Value::Nil };
                self.bind_variable(svar, flag, env, specials)?;
            }
        }

        let rest_args = &args[i.min(args.len())..];
        if let Some(rest) = &ll.rest {
            let rest_value = match list {
                Some(list) => nthcdr(list, i),
                None => Value::list(rest_args.to_vec()),
            };
            self.bind_param(rest, rest_value, env, specials, name)?;
        }

        if ll.key_present {
            if rest_args.len() % 2 != 0 {
                return Err(Condition::program_error(format!(
                    "Odd number of keyword arguments to {}",
                    name
                ))
                .into());
            }
            let allow_key = &self.symbols().kw_allow_other_keys;
            let allow = ll.allow_other_keys
                || rest_args
                    .chunks(2)
                    .find(|pair| matches!(&pair[0], Value::Symbol(s) if s == allow_key))
                    .is_some_and(|pair| pair[1].is_true());
            if !allow {
                for pair in rest_args.chunks(2) {
                    let known = match &pair[0] {
                        Value::Symbol(s) => s == allow_key || ll.keys.iter().any(|k| k.keyword == *s),
                        _ => false,
                    };
                    if !known {
                        return Err(Condition::program_error(format!(
                            "Unknown keyword argument {} to {}",
                            pair[0], name
                        ))
                        .with_datum(pair[0].clone())
                        .into());
                    }
                }
            }
            for key in &ll.keys {
                let found = rest_args
                    .chunks(2)
                    .find(|pair| matches!(&pair[0], Value::Symbol(s) if *s == key.keyword))
                    .map(|pair| pair[1].clone());
                let supplied = found.is_some();
                let value = match found {
                    Some(v) => v,
                    None => self.eval(&key.init, env)?,
                };
                self.bind_param(&key.param, value, env, specials, name)?;
                if let Some(svar) = &key.supplied {
                    let flag = if supplied { t.clone() } else { Value::Nil };
                    self.bind_variable(svar, flag, env, specials)?;
                }
            }
        }

        for (var, init) in &ll.aux {
            let value = self.eval(init, env)?;
            self.bind_variable(var, value, env, specials)?;
        }
        Ok(())
    }

    fn bind_param(
        &mut self,
        param: &Param,
        value: Value,
        env: &Environment,
        specials: &[Symbol],
        name: &str,
    ) -> Result<(), ControlSignal> {
        match param {
            Param::Var(sym) => self.bind_variable(sym, value, env, specials),
            Param::Pattern(ll) => {
                if !value.is_list() {
                    return Err(Condition::program_error(format!(
                        "Cannot destructure {} in arguments to {}",
                        value, name
                    ))
                    .with_datum(value)
                    .into());
                }
                let lexenv = env.clone();
                self.bind_destructuring(ll, &value, &value, &lexenv, env, specials, name)
            }
        }
    }
}

fn nthcdr(list: &Value, n: usize) -> Value {
    let mut current = list.clone();
    for _ in 0..n {
        current = match current {
            Value::Cons(c) => c.cdr(),
            other => return other,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(packages: &PackageRegistry, name: &str) -> Value {
        Value::Symbol(packages.cl_user().intern_symbol(name))
    }

    fn amp(packages: &PackageRegistry, name: &str) -> Value {
        Value::Symbol(packages.intern_cl(name))
    }

    #[test]
    fn test_parse_ordinary() {
        let p = PackageRegistry::new();
        let spec = Value::list(vec![
            sym(&p, "A"),
            amp(&p, "&OPTIONAL"),
            Value::list(vec![sym(&p, "B"), Value::Fixnum(2), sym(&p, "B-P")]),
            amp(&p, "&REST"),
            sym(&p, "R"),
            amp(&p, "&KEY"),
            sym(&p, "K"),
        ]);
        let ll = LambdaList::parse(&spec, LambdaListKind::Ordinary, &p).unwrap();
        assert_eq!(ll.required.len(), 1);
        assert_eq!(ll.optional.len(), 1);
        assert!(ll.optional[0].supplied.is_some());
        assert!(ll.rest.is_some());
        assert_eq!(ll.keys[0].keyword.name(), "K");
        assert!(ll.keys[0].keyword.is_keyword());
        assert_eq!(ll.arity(), Arity::at_least(1));
    }

    #[test]
    fn test_parse_rejects_misplaced_keyword() {
        let p = PackageRegistry::new();
        let spec = Value::list(vec![amp(&p, "&REST"), sym(&p, "A"), sym(&p, "B")]);
        assert!(LambdaList::parse(&spec, LambdaListKind::Ordinary, &p).is_err());
        let spec = Value::list(vec![amp(&p, "&WHOLE"), sym(&p, "W")]);
        assert!(LambdaList::parse(&spec, LambdaListKind::Ordinary, &p).is_err());
    }

    #[test]
    fn test_parse_macro_patterns() {
        let p = PackageRegistry::new();
        let spec = Value::list_with_tail(
            vec![
                amp(&p, "&WHOLE"),
                sym(&p, "W"),
                Value::list(vec![sym(&p, "X"), sym(&p, "Y")]),
            ],
            sym(&p, "BODY"),
        );
        let ll = LambdaList::parse(&spec, LambdaListKind::Macro, &p).unwrap();
        assert!(ll.whole.is_some());
        assert!(matches!(ll.required[0], Param::Pattern(_)));
        assert!(matches!(ll.rest, Some(Param::Var(_))));
    }

    #[test]
    fn test_fixed_arity() {
        let p = PackageRegistry::new();
        let spec = Value::list(vec![sym(&p, "A"), amp(&p, "&OPTIONAL"), sym(&p, "B")]);
        let ll = LambdaList::parse(&spec, LambdaListKind::Ordinary, &p).unwrap();
        assert_eq!(ll.arity(), Arity::range(1, 2));
    }
}
