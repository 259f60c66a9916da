//! Recursive-descent parser for linker scripts.
//!
//! Each parse function corresponds to a state of the script machine:
//! `TopLevel → InMemory → TopLevel → InSections → InOutputSection`. The same
//! token can be valid in one state and not another (`> FLASH` only inside an
//! output section), which is why the states are explicit functions rather
//! than one grammar.
//!
//! Directives that do not affect memory regions (`ENTRY`, `OUTPUT_FORMAT`,
//! `GROUP`, ...) are consumed without effect. Genuinely unknown directives
//! produce a warning and are skipped to the next `;` or matching brace.

use log::warn;

use super::ast::{AssignOp, BinOp, Expr, MemoryEntry, OutputSection, Script, Stmt, UnaryOp};
use super::lexer::{Lexer, Tok, Token};
use super::{LinkerParseError, Span};

/// Directives recognized and deliberately ignored.
const CONSUMED_DIRECTIVES: &[&str] = &[
    "ENTRY",
    "OUTPUT_ARCH",
    "OUTPUT_FORMAT",
    "OUTPUT",
    "TARGET",
    "STARTUP",
    "INCLUDE",
    "GROUP",
    "INPUT",
    "SEARCH_DIR",
    "ASSERT",
    "EXTERN",
    "NOCROSSREFS",
    "REGION_ALIAS",
    "PHDRS",
    "VERSION",
];

pub struct Parser<'a> {
    path: &'a str,
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    warnings: Vec<String>,
}

/// Parses one script. Returns the statement list plus any non-fatal
/// warnings encountered on the way.
pub fn parse(path: &str, source: &str) -> Result<(Script, Vec<String>), LinkerParseError> {
    let tokens = Lexer::tokenize(source)
        .map_err(|e| LinkerParseError::new(path, source, e.span(), e.message()))?;
    let mut parser = Parser {
        path,
        source,
        tokens,
        pos: 0,
        warnings: Vec::new(),
    };
    let stmts = parser.parse_top_level()?;
    Ok((
        Script {
            path: path.to_string(),
            stmts,
        },
        parser.warnings,
    ))
}

/// Parses a standalone expression, requiring the whole input to be
/// consumed. Used for `--def VAR=VALUE` values.
pub fn parse_expression(path: &str, source: &str) -> Result<Expr, LinkerParseError> {
    let tokens = Lexer::tokenize(source)
        .map_err(|e| LinkerParseError::new(path, source, e.span(), e.message()))?;
    let mut parser = Parser {
        path,
        source,
        tokens,
        pos: 0,
        warnings: Vec::new(),
    };
    let expr = parser.parse_expr()?;
    if *parser.current() != Tok::Eof {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(expr)
}

impl<'a> Parser<'a> {
    fn current(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn bump(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn peek(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn error(&self, message: impl Into<String>) -> LinkerParseError {
        LinkerParseError::new(self.path, self.source, self.current_span(), message)
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), LinkerParseError> {
        if self.current() == tok {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.current())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), LinkerParseError> {
        let span = self.current_span();
        match self.current().clone() {
            Tok::Ident(name) => {
                self.bump();
                Ok((name, span))
            }
            other => Err(self.error(format!("expected {what}, found {other:?}"))),
        }
    }

    // ── State: TopLevel ─────────────────────────────────────────────────

    fn parse_top_level(&mut self) -> Result<Vec<Stmt>, LinkerParseError> {
        let mut stmts = Vec::new();
        loop {
            match self.current().clone() {
                Tok::Eof => return Ok(stmts),
                Tok::Semi => self.bump(),
                Tok::Ident(name) => {
                    if name.eq_ignore_ascii_case("MEMORY") {
                        self.bump();
                        stmts.push(self.parse_memory_block()?);
                    } else if name.eq_ignore_ascii_case("SECTIONS") {
                        self.bump();
                        stmts.push(self.parse_sections_block()?);
                    } else if let Some(stmt) = self.try_parse_assignment()? {
                        stmts.push(stmt);
                    } else if CONSUMED_DIRECTIVES.iter().any(|d| name.eq_ignore_ascii_case(d)) {
                        self.bump();
                        self.skip_directive_tail();
                    } else {
                        let span = self.current_span();
                        self.warn(format!(
                            "{}:{}:{}: unknown directive `{}` skipped",
                            self.path, span.line, span.col, name
                        ));
                        self.bump();
                        self.skip_directive_tail();
                    }
                }
                other => {
                    return Err(self.error(format!(
                        "expected a directive or assignment, found {other:?}"
                    )))
                }
            }
        }
    }

    /// Parses `name = expr;` (and friends) when the cursor sits on one;
    /// returns `None` when the identifier is not an assignment target.
    fn try_parse_assignment(&mut self) -> Result<Option<Stmt>, LinkerParseError> {
        match self.current().clone() {
            Tok::Ident(name)
                if name.eq_ignore_ascii_case("PROVIDE")
                    || name.eq_ignore_ascii_case("PROVIDE_HIDDEN")
                    || name.eq_ignore_ascii_case("HIDDEN") =>
            {
                let span = self.current_span();
                self.bump();
                self.expect(&Tok::LParen, "`(`")?;
                let (target, _) = self.expect_ident("a symbol name")?;
                self.expect(&Tok::Eq, "`=`")?;
                let value = self.parse_expr()?;
                self.expect(&Tok::RParen, "`)`")?;
                if *self.current() == Tok::Semi {
                    self.bump();
                }
                Ok(Some(Stmt::Assign {
                    name: target,
                    op: AssignOp::Set,
                    value,
                    provide: true,
                    span,
                }))
            }
            Tok::Ident(name) => {
                let op = match self.peek(1) {
                    Tok::Eq => AssignOp::Set,
                    Tok::PlusEq => AssignOp::Add,
                    Tok::MinusEq => AssignOp::Sub,
                    Tok::StarEq => AssignOp::Mul,
                    Tok::SlashEq => AssignOp::Div,
                    _ => return Ok(None),
                };
                let span = self.current_span();
                self.bump();
                self.bump();
                let value = self.parse_expr()?;
                self.expect(&Tok::Semi, "`;` after assignment")?;
                Ok(Some(Stmt::Assign {
                    name,
                    op,
                    value,
                    provide: false,
                    span,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Consumes a directive's argument list: balanced parentheses when the
    /// directive takes them, otherwise everything up to the next `;` or a
    /// brace-delimited block.
    fn skip_directive_tail(&mut self) {
        if *self.current() == Tok::LParen {
            self.skip_balanced(&Tok::LParen, &Tok::RParen);
            if *self.current() == Tok::Semi {
                self.bump();
            }
            return;
        }
        loop {
            match self.current() {
                Tok::Semi => {
                    self.bump();
                    return;
                }
                Tok::LBrace => {
                    self.skip_balanced(&Tok::LBrace, &Tok::RBrace);
                    return;
                }
                Tok::Eof | Tok::RBrace => return,
                _ => self.bump(),
            }
        }
    }

    fn skip_balanced(&mut self, open: &Tok, close: &Tok) {
        debug_assert_eq!(self.current(), open);
        let mut depth = 0usize;
        loop {
            let tok = self.current().clone();
            if tok == Tok::Eof {
                return;
            }
            self.bump();
            if tok == *open {
                depth += 1;
            } else if tok == *close {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
        }
    }

    // ── State: InMemory ─────────────────────────────────────────────────

    fn parse_memory_block(&mut self) -> Result<Stmt, LinkerParseError> {
        self.expect(&Tok::LBrace, "`{` after MEMORY")?;
        let mut entries = Vec::new();
        loop {
            match self.current().clone() {
                Tok::RBrace => {
                    self.bump();
                    return Ok(Stmt::Memory { entries });
                }
                Tok::Comma | Tok::Semi => self.bump(),
                Tok::Ident(_) | Tok::Str(_) => entries.push(self.parse_memory_entry()?),
                Tok::Eof => return Err(self.error("unterminated MEMORY block")),
                other => {
                    return Err(self.error(format!(
                        "expected a region declaration, found {other:?}"
                    )))
                }
            }
        }
    }

    fn parse_memory_entry(&mut self) -> Result<MemoryEntry, LinkerParseError> {
        let span = self.current_span();
        let name = match self.current().clone() {
            Tok::Ident(n) => {
                self.bump();
                n
            }
            Tok::Str(n) => {
                self.bump();
                n
            }
            other => return Err(self.error(format!("expected region name, found {other:?}"))),
        };

        let attrs = if *self.current() == Tok::LParen {
            self.bump();
            let mut text = String::new();
            loop {
                match self.current().clone() {
                    Tok::RParen => {
                        self.bump();
                        break;
                    }
                    Tok::Ident(part) => {
                        text.push_str(&part);
                        self.bump();
                    }
                    Tok::Bang => {
                        text.push('!');
                        self.bump();
                    }
                    Tok::Eof => return Err(self.error("unterminated attribute list")),
                    other => {
                        return Err(
                            self.error(format!("unexpected {other:?} in attribute list"))
                        )
                    }
                }
            }
            Some(text)
        } else {
            None
        };

        self.expect(&Tok::Colon, "`:` in region declaration")?;

        let mut origin = None;
        let mut length = None;
        for _ in 0..2 {
            let (key, _) = self.expect_ident("ORIGIN or LENGTH")?;
            self.expect(&Tok::Eq, "`=`")?;
            let value = self.parse_expr()?;
            if ["ORIGIN", "org", "o"].iter().any(|k| key.eq_ignore_ascii_case(k)) {
                origin = Some(value);
            } else if ["LENGTH", "len", "l"].iter().any(|k| key.eq_ignore_ascii_case(k)) {
                length = Some(value);
            } else {
                return Err(self.error(format!("expected ORIGIN or LENGTH, found `{key}`")));
            }
            if *self.current() == Tok::Comma {
                self.bump();
            }
        }

        let origin =
            origin.ok_or_else(|| self.error(format!("region `{name}` is missing ORIGIN")))?;
        let length =
            length.ok_or_else(|| self.error(format!("region `{name}` is missing LENGTH")))?;
        Ok(MemoryEntry {
            name,
            attrs,
            origin,
            length,
            span,
        })
    }

    // ── State: InSections ───────────────────────────────────────────────

    fn parse_sections_block(&mut self) -> Result<Stmt, LinkerParseError> {
        self.expect(&Tok::LBrace, "`{` after SECTIONS")?;
        let mut sections = Vec::new();
        let mut stmts = Vec::new();
        loop {
            match self.current().clone() {
                Tok::RBrace => {
                    self.bump();
                    return Ok(Stmt::Sections { sections, stmts });
                }
                Tok::Semi | Tok::Comma => self.bump(),
                Tok::Eof => return Err(self.error("unterminated SECTIONS block")),
                _ => {
                    if let Some(stmt) = self.try_parse_assignment()? {
                        stmts.push(stmt);
                    } else {
                        sections.push(self.parse_output_section()?);
                    }
                }
            }
        }
    }

    // ── State: InOutputSection ──────────────────────────────────────────

    fn parse_output_section(&mut self) -> Result<OutputSection, LinkerParseError> {
        let span = self.current_span();
        let name = match self.current().clone() {
            Tok::Ident(n) => {
                self.bump();
                n
            }
            Tok::Str(n) => {
                self.bump();
                n
            }
            // `/DISCARD/` lexes as slash-ident-slash.
            Tok::Slash => {
                self.bump();
                let (inner, _) = self.expect_ident("DISCARD")?;
                self.expect(&Tok::Slash, "`/`")?;
                format!("/{inner}/")
            }
            other => {
                return Err(self.error(format!("expected an output section name, found {other:?}")))
            }
        };

        // Optional address expression and type decorations before the colon.
        while *self.current() != Tok::Colon {
            match self.current() {
                Tok::LParen => self.skip_balanced(&Tok::LParen, &Tok::RParen),
                Tok::Eof | Tok::LBrace | Tok::RBrace => {
                    return Err(self.error(format!("expected `:` in output section `{name}`")))
                }
                _ => self.bump(),
            }
        }
        self.bump();

        // AT(lma), ALIGN(n), SUBALIGN(n) between the colon and the body.
        while *self.current() != Tok::LBrace {
            match self.current() {
                Tok::LParen => self.skip_balanced(&Tok::LParen, &Tok::RParen),
                Tok::Eof | Tok::RBrace | Tok::Semi => {
                    return Err(self.error(format!("expected `{{` in output section `{name}`")))
                }
                _ => self.bump(),
            }
        }

        // The body's input patterns do not affect the region table.
        self.skip_balanced(&Tok::LBrace, &Tok::RBrace);

        let mut region = None;
        let mut lma_region = None;
        loop {
            match self.current().clone() {
                Tok::Gt => {
                    self.bump();
                    let (target, _) = self.expect_ident("a region name after `>`")?;
                    if region.is_none() {
                        region = Some(target);
                    }
                }
                Tok::Ident(kw) if kw.eq_ignore_ascii_case("AT") && *self.peek(1) == Tok::Gt => {
                    self.bump();
                    self.bump();
                    let (target, _) = self.expect_ident("a region name after `AT>`")?;
                    lma_region = Some(target);
                }
                // Trailing `: phdr` program-header references.
                Tok::Colon => {
                    self.bump();
                    let _ = self.expect_ident("a program header name")?;
                }
                // Trailing `= fillexp`.
                Tok::Eq => {
                    self.bump();
                    let _ = self.parse_expr()?;
                }
                Tok::Comma => {
                    self.bump();
                    break;
                }
                _ => break,
            }
        }

        Ok(OutputSection {
            name,
            region,
            lma_region,
            span,
        })
    }

    // ── Expressions ─────────────────────────────────────────────────────

    pub(super) fn parse_expr(&mut self) -> Result<Expr, LinkerParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, LinkerParseError> {
        let cond = self.parse_binary(0)?;
        if *self.current() == Tok::Question {
            self.bump();
            let then = self.parse_ternary()?;
            self.expect(&Tok::Colon, "`:` in conditional expression")?;
            let otherwise = self.parse_ternary()?;
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            })
        } else {
            Ok(cond)
        }
    }

    /// Binary operator tiers, loosest first.
    const BIN_LEVELS: &'static [&'static [(Tok, BinOp)]] = &[
        &[(Tok::PipePipe, BinOp::Or)],
        &[(Tok::AmpAmp, BinOp::And)],
        &[(Tok::Pipe, BinOp::BitOr)],
        &[(Tok::Caret, BinOp::BitXor)],
        &[(Tok::Amp, BinOp::BitAnd)],
        &[(Tok::EqEq, BinOp::Eq), (Tok::Ne, BinOp::Ne)],
        &[
            (Tok::Lt, BinOp::Lt),
            (Tok::Le, BinOp::Le),
            (Tok::Gt, BinOp::Gt),
            (Tok::Ge, BinOp::Ge),
        ],
        &[(Tok::Shl, BinOp::Shl), (Tok::Shr, BinOp::Shr)],
        &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)],
        &[
            (Tok::Star, BinOp::Mul),
            (Tok::Slash, BinOp::Div),
            (Tok::Percent, BinOp::Rem),
        ],
    ];

    fn parse_binary(&mut self, level: usize) -> Result<Expr, LinkerParseError> {
        if level >= Self::BIN_LEVELS.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let span = self.current_span();
            let op = Self::BIN_LEVELS[level]
                .iter()
                .find(|(tok, _)| tok == self.current())
                .map(|(_, op)| *op);
            let Some(op) = op else {
                return Ok(lhs);
            };
            self.bump();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, LinkerParseError> {
        let span = self.current_span();
        match self.current() {
            Tok::Plus => {
                self.bump();
                self.parse_unary()
            }
            Tok::Minus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.parse_unary()?),
                    span,
                })
            }
            Tok::Bang => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.parse_unary()?),
                    span,
                })
            }
            Tok::Tilde => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    expr: Box::new(self.parse_unary()?),
                    span,
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, LinkerParseError> {
        let span = self.current_span();
        match self.current().clone() {
            Tok::Num(value) => {
                self.bump();
                Ok(Expr::Num(value))
            }
            Tok::Ident(name) => {
                self.bump();
                if *self.current() == Tok::LParen {
                    self.bump();
                    let mut args = Vec::new();
                    if *self.current() != Tok::RParen {
                        loop {
                            args.push(self.parse_expr()?);
                            if *self.current() == Tok::Comma {
                                self.bump();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Tok::RParen, "`)` after call arguments")?;
                    Ok(Expr::Call { name, args, span })
                } else {
                    Ok(Expr::Sym { name, span })
                }
            }
            Tok::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(expr)
            }
            other => Err(self.error(format!("expected an expression, found {other:?}"))),
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Script {
        parse("test.ld", src).expect("parse").0
    }

    #[test]
    fn standard_memory_block() {
        let script = parse_ok(
            "MEMORY\n{\n  FLASH (rx) : ORIGIN = 0x08000000, LENGTH = 512K\n  RAM (rwx) : ORIGIN = 0x20000000, LENGTH = 128K\n}\n",
        );
        let Stmt::Memory { entries } = &script.stmts[0] else {
            panic!("expected MEMORY");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "FLASH");
        assert_eq!(entries[0].attrs.as_deref(), Some("rx"));
        assert_eq!(entries[0].origin, Expr::Num(0x0800_0000));
        assert_eq!(entries[0].length, Expr::Num(512 * 1024));
    }

    #[test]
    fn esp_style_memory_block() {
        let script = parse_ok(
            "MEMORY { dram0_0_seg : org = 0x3FFE8000, len = 80K iram1_0_seg : org = 0x40100000, len = 32K }",
        );
        let Stmt::Memory { entries } = &script.stmts[0] else {
            panic!("expected MEMORY");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "dram0_0_seg");
        assert_eq!(entries[0].attrs, None);
        assert_eq!(entries[1].length, Expr::Num(32 * 1024));
    }

    #[test]
    fn negated_attribute_flags() {
        let script = parse_ok("MEMORY { RAM (rwx!i) : ORIGIN = 0, LENGTH = 1K }");
        let Stmt::Memory { entries } = &script.stmts[0] else {
            panic!("expected MEMORY");
        };
        assert_eq!(entries[0].attrs.as_deref(), Some("rwx!i"));
    }

    #[test]
    fn assignments_and_provide() {
        let script = parse_ok(
            "_flash_size = 512K;\nPROVIDE(_stack_top = 0x20020000);\n_heap_end = _stack_top - 0x400;\n",
        );
        assert_eq!(script.stmts.len(), 3);
        let Stmt::Assign { name, provide, .. } = &script.stmts[1] else {
            panic!("expected assignment");
        };
        assert_eq!(name, "_stack_top");
        assert!(provide);
    }

    #[test]
    fn sections_with_region_placement() {
        let script = parse_ok(
            "SECTIONS\n{\n  .text : { *(.text*) KEEP(*(.isr_vector)) } > FLASH\n  .data : AT(_sidata) { *(.data*) } > RAM AT> FLASH\n  /DISCARD/ : { *(.note*) }\n}\n",
        );
        let Stmt::Sections { sections, .. } = &script.stmts[0] else {
            panic!("expected SECTIONS");
        };
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].region.as_deref(), Some("FLASH"));
        assert_eq!(sections[1].region.as_deref(), Some("RAM"));
        assert_eq!(sections[1].lma_region.as_deref(), Some("FLASH"));
        assert_eq!(sections[2].name, "/DISCARD/");
    }

    #[test]
    fn location_counter_assignment_inside_sections() {
        let script = parse_ok("SECTIONS { . = 0x10000; .text : { *(.text) } > FLASH }");
        let Stmt::Sections { sections, stmts } = &script.stmts[0] else {
            panic!("expected SECTIONS");
        };
        assert_eq!(sections.len(), 1);
        let Stmt::Assign { name, .. } = &stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(name, ".");
    }

    #[test]
    fn unknown_directive_warns_and_continues() {
        let (script, warnings) =
            parse("test.ld", "FROBNICATE(a, b);\nMEMORY { X : ORIGIN = 0, LENGTH = 4 }\n")
                .expect("parse");
        assert_eq!(script.stmts.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("FROBNICATE"));
    }

    #[test]
    fn consumed_directives_are_silent() {
        let (script, warnings) = parse(
            "test.ld",
            "ENTRY(Reset_Handler)\nOUTPUT_FORMAT(\"elf32-littlearm\")\nGROUP(-lgcc)\n",
        )
        .expect("parse");
        assert!(script.stmts.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn syntax_error_cites_location() {
        let err = parse("boards/stm32.ld", "MEMORY { FLASH (rx) ORIGIN = 0 }").unwrap_err();
        assert_eq!(err.file, "boards/stm32.ld");
        assert_eq!(err.line, 1);
        assert!(err.excerpt.contains("FLASH"));
    }

    #[test]
    fn ternary_and_defined() {
        let script = parse_ok("_sd_size = DEFINED(__sd_size__) ? __sd_size__ : 0;");
        let Stmt::Assign { value, .. } = &script.stmts[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Ternary { .. }));
    }
}
