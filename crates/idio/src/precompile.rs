//! Pre-compilation cache files (spec §4.7, §6.2).
//!
//! A cache file is one top-level list, written in a small read-syntax of
//! its own rather than through `serde`: the field order and validation
//! rules are pinned exactly by §6.2, so the writer/reader here encode and
//! decode that grammar by hand, the way `original_source/src/vm.c`'s
//! `idio_vm_save_pre_compilation`/`idio_vm_load_pre_compilation` walk a
//! fixed field list rather than deferring to a generic serializer.
//!
//! There is no VCS in this workspace to pull a real commit hash from, so
//! `COMPILER_COMMIT`/`ASSEMBLER_COMMIT` are the crate's own name+version --
//! still a string that is stable for one build and changes across builds,
//! which is everything the equality check in §4.7 requires (see DESIGN.md).

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::intern::Interns;
use crate::loc::SourceLoc;
use crate::module::ModuleId;
use crate::runtime::Runtime;
use crate::symbol_info::{ConstantIndex, Scope, SymbolInfo, SymbolTableIndex, ValueIndex};
use crate::value::{ConstantIdio, IdioString, Value};
use crate::xenv::{Xenv, XenvId};

pub const COMPILER_COMMIT: &str = concat!(env!("CARGO_PKG_NAME"), "-compiler@", env!("CARGO_PKG_VERSION"));
pub const ASSEMBLER_COMMIT: &str = concat!(env!("CARGO_PKG_NAME"), "-assembler@", env!("CARGO_PKG_VERSION"));

/// `"SHA256:"` + hex digest, matching §6.2 field 4's literal format.
#[must_use]
pub fn source_checksum(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2 + 7);
    hex.push_str("SHA256:");
    for byte in digest {
        write!(hex, "{byte:02x}").expect("writing to a String cannot fail");
    }
    hex
}

/// One parsed datum of the cache grammar: integers, strings, symbols,
/// booleans/nil, dotted pairs, and the one extension the generic reader
/// (spec §6.1's stand-in) doesn't need -- an octet string for the raw
/// byte-code blob.
#[derive(Debug, Clone, PartialEq)]
enum Datum {
    Int(i64),
    Str(String),
    Sym(String),
    Bool(bool),
    Nil,
    Bytes(Vec<u8>),
    Pair(Box<Datum>, Box<Datum>),
}

impl Datum {
    fn list(items: impl IntoIterator<Item = Datum, IntoIter: DoubleEndedIterator>) -> Datum {
        let mut acc = Datum::Nil;
        for item in items.into_iter().rev() {
            acc = Datum::Pair(Box::new(item), Box::new(acc));
        }
        acc
    }

    fn into_list(self) -> Option<Vec<Datum>> {
        let mut items = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Datum::Nil => return Some(items),
                Datum::Pair(car, cdr) => {
                    items.push(*car);
                    cur = *cdr;
                }
                _ => return None,
            }
        }
    }

    fn as_int(&self) -> Option<i64> {
        if let Datum::Int(n) = self { Some(*n) } else { None }
    }

    fn as_str(&self) -> Option<&str> {
        if let Datum::Str(s) = self { Some(s) } else { None }
    }

    fn as_bytes(self) -> Option<Vec<u8>> {
        if let Datum::Bytes(b) = self { Some(b) } else { None }
    }
}

fn write_datum(out: &mut String, d: &Datum) {
    match d {
        Datum::Int(n) => {
            write!(out, "{n}").unwrap();
        }
        Datum::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    _ => out.push(c),
                }
            }
            out.push('"');
        }
        Datum::Sym(s) => out.push_str(s),
        Datum::Bool(true) => out.push_str("#t"),
        Datum::Bool(false) => out.push_str("#f"),
        Datum::Nil => out.push_str("#n"),
        Datum::Bytes(bytes) => {
            out.push_str("#u8\"");
            for byte in bytes {
                write!(out, "{byte:02x}").unwrap();
            }
            out.push('"');
        }
        Datum::Pair(car, cdr) => {
            out.push('(');
            write_datum(out, car);
            let mut tail = cdr.as_ref();
            loop {
                match tail {
                    Datum::Nil => break,
                    Datum::Pair(next_car, next_cdr) => {
                        out.push(' ');
                        write_datum(out, next_car);
                        tail = next_cdr;
                    }
                    other => {
                        out.push_str(" . ");
                        write_datum(out, other);
                        break;
                    }
                }
            }
            out.push(')');
        }
    }
}

struct DatumParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DatumParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { bytes: src.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse(&mut self) -> Option<Datum> {
        self.skip_ws();
        match self.peek()? {
            b'(' => self.parse_list(),
            b'"' => self.parse_string().map(Datum::Str),
            b'#' => self.parse_hash(),
            _ => self.parse_atom(),
        }
    }

    fn parse_list(&mut self) -> Option<Datum> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek()? {
                b')' => {
                    self.pos += 1;
                    let mut acc = Datum::Nil;
                    for item in items.into_iter().rev() {
                        acc = Datum::Pair(Box::new(item), Box::new(acc));
                    }
                    return Some(acc);
                }
                b'.' if self.bytes.get(self.pos + 1).is_none_or(u8::is_ascii_whitespace) => {
                    self.pos += 1;
                    let tail = self.parse()?;
                    self.skip_ws();
                    if self.peek()? != b')' {
                        return None;
                    }
                    self.pos += 1;
                    let mut acc = tail;
                    for item in items.into_iter().rev() {
                        acc = Datum::Pair(Box::new(item), Box::new(acc));
                    }
                    return Some(acc);
                }
                _ => items.push(self.parse()?),
            }
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek()? {
                b'"' => {
                    self.pos += 1;
                    return Some(out);
                }
                b'\\' => {
                    self.pos += 1;
                    match self.peek()? {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        c => out.push(c as char),
                    }
                    self.pos += 1;
                }
                _ => {
                    let start = self.pos;
                    self.pos += 1;
                    out.push_str(std::str::from_utf8(&self.bytes[start..self.pos]).ok()?);
                }
            }
        }
    }

    fn parse_hash(&mut self) -> Option<Datum> {
        self.pos += 1;
        match self.peek()? {
            b't' => {
                self.pos += 1;
                Some(Datum::Bool(true))
            }
            b'f' => {
                self.pos += 1;
                Some(Datum::Bool(false))
            }
            b'n' => {
                self.pos += 1;
                Some(Datum::Nil)
            }
            b'u' => {
                self.pos += 2; // "u8"
                let hex = self.parse_string()?;
                if hex.len() % 2 != 0 {
                    return None;
                }
                let mut bytes = Vec::with_capacity(hex.len() / 2);
                let mut i = 0;
                while i < hex.len() {
                    let byte = u8::from_str_radix(&hex[i..i + 2], 16).ok()?;
                    bytes.push(byte);
                    i += 2;
                }
                Some(Datum::Bytes(bytes))
            }
            _ => None,
        }
    }

    fn parse_atom(&mut self) -> Option<Datum> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'"') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        if let Ok(n) = text.parse::<i64>() {
            Some(Datum::Int(n))
        } else {
            Some(Datum::Sym(text.to_owned()))
        }
    }
}

/// Converts one compile-time constant into its cache-file datum. Every
/// variant `extend_tables`/`constants_lookup_or_extend` actually puts in a
/// `cs` table is covered; heap values that only ever exist at run time
/// (closures, continuations, struct instances, ...) can't appear here and
/// return `None`.
fn value_to_datum(value: &Value, interns: &Interns) -> Option<Datum> {
    match value {
        Value::Fixnum(n) => Some(Datum::Int(*n)),
        Value::Constant(ConstantIdio::Nil) => Some(Datum::Nil),
        Value::Constant(ConstantIdio::True) => Some(Datum::Bool(true)),
        Value::Constant(ConstantIdio::False) => Some(Datum::Bool(false)),
        Value::Constant(other) => Some(Datum::Sym(format!("{other}"))),
        Value::Symbol(sym) => Some(Datum::Sym(interns.symbol_name(*sym))),
        Value::Keyword(kw) => Some(Datum::Sym(format!(":{}", interns.keyword_name(*kw)))),
        Value::String(s) => Some(Datum::Str(s.borrow().as_str().to_owned())),
        Value::Pair(p) => {
            let cell = p.borrow();
            let car = value_to_datum(&cell.car, interns)?;
            let cdr = value_to_datum(&cell.cdr, interns)?;
            Some(Datum::Pair(Box::new(car), Box::new(cdr)))
        }
        _ => None,
    }
}

fn datum_to_value(datum: &Datum, interns: &Interns) -> Option<Value> {
    match datum {
        Datum::Int(n) => Some(Value::Fixnum(*n)),
        Datum::Nil => Some(Value::nil()),
        Datum::Bool(b) => Some(Value::bool(*b)),
        Datum::Str(s) => Some(Value::String(crate::heap::Gc::new(IdioString::whole(s.as_str())))),
        Datum::Sym(s) => Some(if let Some(name) = s.strip_prefix(':') {
            Value::Keyword(interns.intern_keyword(name))
        } else {
            Value::Symbol(interns.intern_symbol(s))
        }),
        Datum::Pair(car, cdr) => {
            let car = datum_to_value(car, interns)?;
            let cdr = datum_to_value(cdr, interns)?;
            Some(Value::cons(car, cdr))
        }
        Datum::Bytes(_) => None,
    }
}

fn loc_to_datum(loc: Option<&SourceLoc>) -> Datum {
    match loc {
        None => Datum::Bool(false),
        Some(loc) => Datum::Pair(Box::new(Datum::Str(loc.file.clone())), Box::new(Datum::Int(i64::from(loc.line)))),
    }
}

fn datum_to_loc(datum: &Datum) -> Option<Option<SourceLoc>> {
    match datum {
        Datum::Bool(false) => Some(None),
        Datum::Pair(file, line) => {
            let file = file.as_str()?.to_owned();
            let line = u32::try_from(line.as_int()?).ok()?;
            Some(Some(SourceLoc { file, line }))
        }
        _ => None,
    }
}

/// Writes `xenv` (entered at `entry_pc`) to `path` as a pre-compilation
/// cache file (spec §6.2). `source` is the originating file's text, used
/// only to compute the checksum field -- pass `None` when there is no
/// backing source file to checksum against.
///
/// # Errors
///
/// Returns an I/O error if `path` cannot be written, or if the xenv holds
/// a constant `value_to_datum` cannot represent in read-syntax (heap
/// values that only make sense at run time).
pub fn write_cache(path: &Path, interns: &Interns, xenv: &Xenv, entry_pc: usize, source: Option<&str>) -> io::Result<()> {
    let n = xenv.st_len();
    let st_pairs = Datum::list((0..n).map(|i| {
        let si = crate::symbol_info::SymbolTableIndex(u32::try_from(i).expect("symbol table index overflow"));
        Datum::Pair(Box::new(Datum::Int(i as i64)), Box::new(Datum::Int(i64::from(xenv.st_get(si).0))))
    }));

    let constants = (0..xenv.cs_len())
        .map(|i| {
            let ci = ConstantIndex(u32::try_from(i).expect("constants index overflow"));
            value_to_datum(xenv.cs_get(ci), interns)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "constant has no read-syntax"))
        })
        .collect::<io::Result<Vec<_>>>()?;

    let ses = (0..xenv.ses_len())
        .map(|i| {
            value_to_datum(xenv.src_expr(i), interns)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "source expression has no read-syntax"))
        })
        .collect::<io::Result<Vec<_>>>()?;
    let sps = (0..xenv.ses_len()).map(|i| loc_to_datum(xenv.src_prop(i))).collect::<Vec<_>>();

    let checksum = source.map_or(Datum::Bool(false), |src| Datum::Str(source_checksum(src)));
    let timestamp = chrono::Utc::now().to_rfc3339();

    let top = Datum::list(vec![
        Datum::Str(COMPILER_COMMIT.to_owned()),
        Datum::Str(timestamp),
        Datum::Str(ASSEMBLER_COMMIT.to_owned()),
        checksum,
        Datum::Int(n as i64),
        st_pairs,
        Datum::list(constants),
        Datum::Int(entry_pc as i64),
        Datum::Bytes(xenv.bc.clone()),
        Datum::list(ses),
        Datum::list(sps),
    ]);

    let mut text = String::new();
    write_datum(&mut text, &top);
    fs::write(path, text)
}

/// The tables recovered from a cache file, ready to become a fresh xenv.
pub struct LoadedCache {
    pub xenv: Xenv,
    pub entry_pc: usize,
}

/// Reads and validates a cache file written by [`write_cache`] (spec §4.7).
///
/// Returns `None` on *any* mismatch or malformed input -- wrong commit
/// strings, a checksum that doesn't match `expected_source`, an
/// out-of-bounds index, or a file that isn't parseable cache syntax at
/// all. Per §9 ("Unresolved cache-file semantics"), the boolean
/// did-it-load result is the only observable contract; callers that want
/// to explain *why* a cache missed should log separately, not branch on
/// it.
///
/// `vt` isn't part of the cache file at all (spec §6.2's eleven fields stop
/// at `sps`): the original per-xenv value table the file format descends
/// from is reconstructed fresh from `st` on every load (`original_source/
/// src/vm.c`'s `idio_vm_add_xenv` starts from an all-placeholder `vs`), but
/// here `vi` is a process-wide index, not a per-xenv one, so "fresh" means
/// binding each loaded symbol into `module` the same way `meaning_define`
/// binds a freshly-compiled one: reuse the module's existing binding if it
/// already has a resolved `vi`, otherwise allocate a new global value slot.
#[must_use]
pub fn try_load_cache(
    path: &Path, runtime: &mut Runtime, new_index: XenvId, module: ModuleId, expected_source: Option<&str>,
) -> Option<LoadedCache> {
    let text = fs::read_to_string(path).ok()?;
    let mut parser = DatumParser::new(&text);
    let top = parser.parse()?.into_list()?;
    let [compiler_commit, timestamp, assembler_commit, checksum, n, st_pairs, constants, entry_pc, bc, ses, sps] =
        <[Datum; 11]>::try_from(top).ok()?;
    let _ = timestamp;

    if compiler_commit.as_str()? != COMPILER_COMMIT || assembler_commit.as_str()? != ASSEMBLER_COMMIT {
        return None;
    }

    if let (Some(expected), Datum::Str(stored)) = (expected_source, &checksum)
        && source_checksum(expected) != *stored
    {
        return None;
    }

    let n = usize::try_from(n.as_int()?).ok()?;
    let st_pairs = st_pairs.into_list()?;
    if st_pairs.len() != n {
        return None;
    }
    let constants = constants.into_list()?;
    let entry_pc = usize::try_from(entry_pc.as_int()?).ok()?;
    let bc = bc.as_bytes()?;
    if entry_pc > bc.len() {
        return None;
    }
    let ses = ses.into_list()?;
    let sps = sps.into_list()?;
    if ses.len() != sps.len() {
        return None;
    }

    let mut st = Vec::with_capacity(n);
    for (i, pair) in st_pairs.iter().enumerate() {
        let Datum::Pair(si, ci) = pair else { return None };
        if si.as_int()? != i as i64 {
            return None;
        }
        let ci = usize::try_from(ci.as_int()?).ok()?;
        if ci >= constants.len() {
            return None;
        }
        st.push(ConstantIndex(u32::try_from(ci).ok()?));
    }

    let constants = constants
        .iter()
        .map(|d| datum_to_value(d, &runtime.interns))
        .collect::<Option<Vec<_>>>()?;

    let ses_values = ses.iter().map(|d| datum_to_value(d, &runtime.interns)).collect::<Option<Vec<_>>>()?;
    let sps_locs = sps.iter().map(datum_to_loc).collect::<Option<Vec<_>>>()?;

    let mut vt = Vec::with_capacity(n);
    for (i, ci) in st.iter().enumerate() {
        let name = match &constants[ci.0 as usize] {
            Value::Symbol(name) => *name,
            _ => return None,
        };
        let si = SymbolTableIndex(u32::try_from(i).ok()?);
        let existing = runtime.modules.module(module).local(name).cloned();
        let vi = match existing {
            Some(info) if info.vi.is_resolved() => info.vi,
            _ => runtime.alloc_value(Value::Constant(ConstantIdio::Undef)),
        };
        runtime.modules.module_mut(module).define(
            name,
            SymbolInfo {
                scope: Scope::Toplevel,
                xi: new_index,
                si,
                ci: *ci,
                vi,
                module,
                description: "precompiled".to_owned(),
                name,
            },
        );
        vt.push(vi);
    }

    let xenv = Xenv::from_parts(new_index, "precompiled", st, vt, constants, ses_values, sps_locs, bc);
    if !xenv.check_invariants() {
        return None;
    }
    Some(LoadedCache { xenv, entry_pc })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load_round_trips_constants_and_bytecode() {
        let mut runtime = Runtime::new();
        let module = runtime.root_module;
        let mut xenv = Xenv::new(XenvId(1), "test");
        let name = runtime.interns.intern_symbol("answer");
        let (_si, _info) = xenv.extend_tables(name, crate::symbol_info::Scope::Toplevel, module, "top", None);
        xenv.bc = vec![0x01, 0x02, 0x03];

        let dir = std::env::temp_dir();
        let path = dir.join(format!("idio-precompile-test-{:x}.cache", std::process::id()));
        write_cache(&path, &runtime.interns, &xenv, 1, Some("(define answer 42)")).unwrap();

        let loaded = try_load_cache(&path, &mut runtime, XenvId(2), module, Some("(define answer 42)")).expect("cache should load");
        assert_eq!(loaded.entry_pc, 1);
        assert_eq!(loaded.xenv.bc, vec![0x01, 0x02, 0x03]);
        assert_eq!(loaded.xenv.st_len(), 1);
        assert!(loaded.xenv.vt_get(crate::symbol_info::SymbolTableIndex(0)).is_resolved());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mismatched_checksum_fails_to_load() {
        let mut runtime = Runtime::new();
        let module = runtime.root_module;
        let xenv = Xenv::new(XenvId(1), "test");

        let dir = std::env::temp_dir();
        let path = dir.join(format!("idio-precompile-test-checksum-{:x}.cache", std::process::id()));
        write_cache(&path, &runtime.interns, &xenv, 0, Some("original source")).unwrap();

        let loaded = try_load_cache(&path, &mut runtime, XenvId(2), module, Some("different source"));
        assert!(loaded.is_none());

        let _ = fs::remove_file(&path);
    }
}
