//! Linker expression evaluation.
//!
//! Expressions are evaluated over 64-bit signed integers with checked
//! arithmetic; the results are reinterpreted as unsigned when they become
//! region origins and lengths. `&&`, `||` and `?:` are lazy, so the common
//! `DEFINED(x) ? x : default` idiom never trips over the undefined symbol.
//!
//! Symbol lookup is layered: script assignments first, then the
//! architecture-default table, then CLI overrides. An undefined symbol is an
//! error naming its first use site, unless it only appears inside
//! `DEFINED()`.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::{debug, warn};

use super::ast::{BinOp, Expr, UnaryOp};
use super::{LinkerEvalError, Span};
use crate::model::MemoryRegion;

/// Facts about an ELF section, used to resolve `SIZEOF`/`ADDR`/`LOADADDR`/
/// `ALIGNOF` without simulating the linker's own layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectionFacts {
    pub address: u64,
    pub load_address: u64,
    pub size: u64,
    pub align: u64,
}

pub struct Evaluator<'a> {
    /// Script path, for error messages.
    pub file: &'a str,
    /// Symbols assigned by the scripts so far.
    pub values: &'a IndexMap<String, i64>,
    /// Architecture defaults, consulted when the scripts leave a symbol
    /// unset.
    pub arch_defaults: &'a BTreeMap<String, i64>,
    /// `--def VAR=VALUE` overrides from the command line.
    pub overrides: &'a BTreeMap<String, i64>,
    /// Regions resolved so far, for `ORIGIN()`/`LENGTH()`.
    pub regions: &'a IndexMap<String, MemoryRegion>,
    /// Scanned ELF sections, when available.
    pub sections: Option<&'a BTreeMap<String, SectionFacts>>,
    /// Non-fatal anomaly sink.
    pub warnings: &'a mut Vec<String>,
}

impl Evaluator<'_> {
    pub fn eval(&mut self, expr: &Expr) -> Result<i64, LinkerEvalError> {
        match expr {
            Expr::Num(value) => Ok(*value),
            Expr::Sym { name, span } => self
                .lookup(name)
                .ok_or_else(|| self.undefined(name, *span)),
            Expr::Call { name, args, span } => self.call(name, args, *span),
            Expr::Unary { op, expr, span } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Neg => value.checked_neg().ok_or_else(|| self.overflow(*span)),
                    UnaryOp::Not => Ok((value == 0) as i64),
                    UnaryOp::BitNot => Ok(!value),
                }
            }
            Expr::Bin { op, lhs, rhs, span } => self.eval_bin(*op, lhs, rhs, *span),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)? != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_bin(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<i64, LinkerEvalError> {
        // Logical operators short-circuit before the rhs is touched.
        match op {
            BinOp::And => {
                return Ok(if self.eval(lhs)? != 0 && self.eval(rhs)? != 0 {
                    1
                } else {
                    0
                })
            }
            BinOp::Or => {
                return Ok(if self.eval(lhs)? != 0 || self.eval(rhs)? != 0 {
                    1
                } else {
                    0
                })
            }
            _ => (),
        }

        let lhs = self.eval(lhs)?;
        let rhs = self.eval(rhs)?;
        match op {
            BinOp::Mul => lhs.checked_mul(rhs).ok_or_else(|| self.overflow(span)),
            BinOp::Div => {
                if rhs == 0 {
                    Err(self.div_by_zero(span))
                } else {
                    lhs.checked_div(rhs).ok_or_else(|| self.overflow(span))
                }
            }
            BinOp::Rem => {
                if rhs == 0 {
                    Err(self.div_by_zero(span))
                } else {
                    lhs.checked_rem(rhs).ok_or_else(|| self.overflow(span))
                }
            }
            BinOp::Add => lhs.checked_add(rhs).ok_or_else(|| self.overflow(span)),
            BinOp::Sub => lhs.checked_sub(rhs).ok_or_else(|| self.overflow(span)),
            BinOp::Shl => {
                if !(0..64).contains(&rhs) {
                    Err(self.overflow(span))
                } else {
                    Ok(((lhs as u64) << rhs) as i64)
                }
            }
            BinOp::Shr => {
                if !(0..64).contains(&rhs) {
                    Err(self.overflow(span))
                } else {
                    // ld shifts are unsigned.
                    Ok(((lhs as u64) >> rhs) as i64)
                }
            }
            BinOp::Lt => Ok((lhs < rhs) as i64),
            BinOp::Le => Ok((lhs <= rhs) as i64),
            BinOp::Gt => Ok((lhs > rhs) as i64),
            BinOp::Ge => Ok((lhs >= rhs) as i64),
            BinOp::Eq => Ok((lhs == rhs) as i64),
            BinOp::Ne => Ok((lhs != rhs) as i64),
            BinOp::BitAnd => Ok(lhs & rhs),
            BinOp::BitXor => Ok(lhs ^ rhs),
            BinOp::BitOr => Ok(lhs | rhs),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], span: Span) -> Result<i64, LinkerEvalError> {
        match name.to_ascii_uppercase().as_str() {
            "DEFINED" => match args {
                [Expr::Sym { name, .. }] => Ok(self.is_defined(name) as i64),
                _ => {
                    self.warn(format!(
                        "{}:{}:{}: DEFINED() expects a symbol name",
                        self.file, span.line, span.col
                    ));
                    Ok(0)
                }
            },
            "ALIGN" => match args {
                [value] => {
                    // Single-argument form aligns the location counter.
                    let align = self.eval(value)?;
                    let dot = self.lookup(".").unwrap_or(0);
                    Ok(align_up(dot, align))
                }
                [value, align] => {
                    let value = self.eval(value)?;
                    let align = self.eval(align)?;
                    Ok(align_up(value, align))
                }
                _ => Ok(self.bad_call(name, span)),
            },
            "ORIGIN" => self.region_query(args, span, |r| r.origin as i64),
            "LENGTH" => self.region_query(args, span, |r| r.length as i64),
            "SIZEOF" => self.section_query(args, span, |s| s.size as i64),
            "ADDR" => self.section_query(args, span, |s| s.address as i64),
            "LOADADDR" => self.section_query(args, span, |s| s.load_address as i64),
            "ALIGNOF" => self.section_query(args, span, |s| s.align as i64),
            "MAX" => match args {
                [a, b] => Ok(self.eval(a)?.max(self.eval(b)?)),
                _ => Ok(self.bad_call(name, span)),
            },
            "MIN" => match args {
                [a, b] => Ok(self.eval(a)?.min(self.eval(b)?)),
                _ => Ok(self.bad_call(name, span)),
            },
            "CONSTANT" => match args {
                [Expr::Sym { name, .. }] if name == "MAXPAGESIZE" => Ok(0x10000),
                [Expr::Sym { name, .. }] if name == "COMMONPAGESIZE" => Ok(0x1000),
                _ => Ok(self.bad_call(name, span)),
            },
            "ABSOLUTE" => match args {
                [value] => self.eval(value),
                _ => Ok(self.bad_call(name, span)),
            },
            _ => {
                self.warn(format!(
                    "{}:{}:{}: unknown function `{}` evaluates to 0",
                    self.file, span.line, span.col, name
                ));
                Ok(0)
            }
        }
    }

    fn region_query(
        &mut self,
        args: &[Expr],
        span: Span,
        get: impl Fn(&MemoryRegion) -> i64,
    ) -> Result<i64, LinkerEvalError> {
        let [Expr::Sym { name, .. }] = args else {
            return Err(LinkerEvalError::UnknownRegion {
                name: "<expression>".to_string(),
                file: self.file.to_string(),
                line: span.line,
                col: span.col,
            });
        };
        match self.regions.get(name.as_str()) {
            Some(region) => Ok(get(region)),
            None => Err(LinkerEvalError::UnknownRegion {
                name: name.clone(),
                file: self.file.to_string(),
                line: span.line,
                col: span.col,
            }),
        }
    }

    fn section_query(
        &mut self,
        args: &[Expr],
        span: Span,
        get: impl Fn(&SectionFacts) -> i64,
    ) -> Result<i64, LinkerEvalError> {
        let [Expr::Sym { name, .. }] = args else {
            self.warn(format!(
                "{}:{}:{}: section query expects a section name",
                self.file, span.line, span.col
            ));
            return Ok(0);
        };
        match self.sections {
            Some(sections) => match sections.get(name.as_str()) {
                Some(facts) => Ok(get(facts)),
                None => {
                    self.warn(format!(
                        "{}:{}:{}: section `{}` not present in the ELF, evaluates to 0",
                        self.file, span.line, span.col, name
                    ));
                    Ok(0)
                }
            },
            // No ELF context (standalone script evaluation): quietly 0.
            None => {
                debug!(
                    "{}:{}:{}: no section table for `{}` query",
                    self.file, span.line, span.col, name
                );
                Ok(0)
            }
        }
    }

    fn bad_call(&mut self, name: &str, span: Span) -> i64 {
        self.warn(format!(
            "{}:{}:{}: malformed call to `{}` evaluates to 0",
            self.file, span.line, span.col, name
        ));
        0
    }

    fn lookup(&self, name: &str) -> Option<i64> {
        self.values
            .get(name)
            .or_else(|| self.arch_defaults.get(name))
            .or_else(|| self.overrides.get(name))
            .copied()
    }

    fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn undefined(&self, name: &str, span: Span) -> LinkerEvalError {
        LinkerEvalError::UndefinedSymbol {
            name: name.to_string(),
            file: self.file.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    fn overflow(&self, span: Span) -> LinkerEvalError {
        LinkerEvalError::Overflow {
            file: self.file.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    fn div_by_zero(&self, span: Span) -> LinkerEvalError {
        LinkerEvalError::DivisionByZero {
            file: self.file.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

fn align_up(value: i64, align: i64) -> i64 {
    if align <= 1 {
        return value;
    }
    let align = align as u64;
    let value = value as u64;
    (value.wrapping_add(align - 1) & !(align - 1)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::parser;
    use crate::model::{RegionAttrs, RegionClass};

    fn eval_str(src: &str, values: &[(&str, i64)]) -> Result<i64, LinkerEvalError> {
        let source = format!("__probe__ = {src};");
        let (script, _) = parser::parse("test.ld", &source).expect("parse");
        let crate::linker::ast::Stmt::Assign { value, .. } = &script.stmts[0] else {
            panic!("expected assignment");
        };
        let values: IndexMap<String, i64> =
            values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let defaults = BTreeMap::new();
        let overrides = BTreeMap::new();
        let regions = IndexMap::new();
        let mut warnings = Vec::new();
        let mut evaluator = Evaluator {
            file: "test.ld",
            values: &values,
            arch_defaults: &defaults,
            overrides: &overrides,
            regions: &regions,
            sections: None,
            warnings: &mut warnings,
        };
        evaluator.eval(value)
    }

    #[test]
    fn precedence() {
        assert_eq!(eval_str("1 + 2 * 3", &[]).unwrap(), 7);
        assert_eq!(eval_str("(1 << 4) | 3", &[]).unwrap(), 19);
        assert_eq!(eval_str("0x100 - 0x20 / 4", &[]).unwrap(), 0x100 - 8);
    }

    #[test]
    fn defined_guards_undefined_symbols() {
        assert_eq!(eval_str("DEFINED(__foo__) ? __foo__ : 42", &[]).unwrap(), 42);
        assert_eq!(
            eval_str("DEFINED(__foo__) ? __foo__ : 42", &[("__foo__", 7)]).unwrap(),
            7
        );
    }

    #[test]
    fn undefined_symbol_names_use_site() {
        let err = eval_str("__flash_size__ - 1", &[]).unwrap_err();
        match err {
            LinkerEvalError::UndefinedSymbol { name, file, .. } => {
                assert_eq!(name, "__flash_size__");
                assert_eq!(file, "test.ld");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(eval_str("ALIGN(0x1001, 0x100)", &[]).unwrap(), 0x1100);
        assert_eq!(eval_str("ALIGN(0x1000, 0x100)", &[]).unwrap(), 0x1000);
    }

    #[test]
    fn short_circuit_protects_rhs() {
        assert_eq!(eval_str("0 && __nope__", &[]).unwrap(), 0);
        assert_eq!(eval_str("1 || __nope__", &[]).unwrap(), 1);
    }

    #[test]
    fn min_max_constant() {
        assert_eq!(eval_str("MAX(4, 9)", &[]).unwrap(), 9);
        assert_eq!(eval_str("MIN(4, 9)", &[]).unwrap(), 4);
        assert_eq!(eval_str("CONSTANT(COMMONPAGESIZE)", &[]).unwrap(), 0x1000);
    }

    #[test]
    fn unknown_function_is_zero_with_warning() {
        let source = "__probe__ = MYSTERY(1, 2);";
        let (script, _) = parser::parse("test.ld", source).expect("parse");
        let crate::linker::ast::Stmt::Assign { value, .. } = &script.stmts[0] else {
            panic!("expected assignment");
        };
        let values = IndexMap::new();
        let defaults = BTreeMap::new();
        let overrides = BTreeMap::new();
        let regions = IndexMap::new();
        let mut warnings = Vec::new();
        let mut evaluator = Evaluator {
            file: "test.ld",
            values: &values,
            arch_defaults: &defaults,
            overrides: &overrides,
            regions: &regions,
            sections: None,
            warnings: &mut warnings,
        };
        assert_eq!(evaluator.eval(value).unwrap(), 0);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn origin_and_length_read_the_region_table() {
        let (script, _) =
            parser::parse("test.ld", "__probe__ = ORIGIN(RAM) + LENGTH(RAM);").expect("parse");
        let crate::linker::ast::Stmt::Assign { value, .. } = &script.stmts[0] else {
            panic!("expected assignment");
        };
        let values = IndexMap::new();
        let defaults = BTreeMap::new();
        let overrides = BTreeMap::new();
        let mut regions = IndexMap::new();
        regions.insert(
            "RAM".to_string(),
            MemoryRegion {
                name: "RAM".into(),
                origin: 0x2000_0000,
                length: 0x2_0000,
                attrs: RegionAttrs::parse("rwx"),
                class: RegionClass::Ram,
                parent: None,
                auto: false,
            },
        );
        let mut warnings = Vec::new();
        let mut evaluator = Evaluator {
            file: "test.ld",
            values: &values,
            arch_defaults: &defaults,
            overrides: &overrides,
            regions: &regions,
            sections: None,
            warnings: &mut warnings,
        };
        assert_eq!(evaluator.eval(value).unwrap(), 0x2002_0000);
    }
}
