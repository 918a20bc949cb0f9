//! Description-line grammar: tokenizer, per-datatype token parsers and
//! constructors, and varargs-cookie resolution.
//!
//! A description is a whitespace-separated sequence of tokens, one group per
//! `IN_DESCRIPTION` field in table order. Arrays nest `( ... )` once per element
//! dimension, strings may be quoted, and record references are written by name.

use crate::field::{rec, Dimensions, Extent, FieldDescriptor, StorageSlot};
use crate::{
    DriverEntry, DriverRegistry, FieldFlags, FieldRef, FieldType, FieldValue, InterfaceRef,
    Record, RecordHandle, RecordList, Result, RuntimeError, Scalar,
};
use crate::{FIELD_NAME_LENGTH, INTERFACE_ADDRESS_NAME_LENGTH, MAX_DIMENSIONS, RECORD_NAME_LENGTH};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(s) => f.write_str(s),
            Token::Quoted(s) => f.write_str(&quote(s)),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

/// Splits a description into tokens. Parentheses are always tokens of their own.
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some(escaped) => s.push(escaped),
                            None => break,
                        },
                        _ => s.push(c),
                    }
                }
                if !closed {
                    return Err(RuntimeError::UnparseableString(format!(
                        "unterminated quoted string \"{s}"
                    )));
                }
                tokens.push(Token::Quoted(s));
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(s));
            }
        }
    }
    Ok(tokens)
}

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn is_name_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, '"' | '(' | ')' | '.' | ':' | '\\'))
}

/// Checks a record name: non-empty, bounded, not `NULL`, no separators.
pub fn validate_record_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RuntimeError::UnparseableString("empty record name".into()));
    }
    if name.len() > RECORD_NAME_LENGTH {
        return Err(RuntimeError::WouldExceedLimit(format!(
            "record name '{name}' is longer than {RECORD_NAME_LENGTH} bytes"
        )));
    }
    if name == "NULL" {
        return Err(RuntimeError::UnparseableString(
            "'NULL' cannot be used as a record name".into(),
        ));
    }
    if !name.chars().all(is_name_char) {
        return Err(RuntimeError::UnparseableString(format!(
            "record name '{name}' contains a reserved character"
        )));
    }
    Ok(())
}

fn validate_token_name(what: &str, name: &str, max: usize) -> Result<()> {
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(RuntimeError::UnparseableString(format!("invalid {what} '{name}'")));
    }
    if name.len() > max {
        return Err(RuntimeError::WouldExceedLimit(format!(
            "{what} '{name}' is longer than {max} bytes"
        )));
    }
    Ok(())
}

/// Reads the leading name, superclass, class and driver tokens and checks they agree.
pub(crate) fn identify(registry: &DriverRegistry, tokens: &[Token]) -> Result<(String, Arc<DriverEntry>)> {
    if tokens.len() < 4 {
        return Err(RuntimeError::UnparseableString(
            "description needs a name, superclass, class and type".into(),
        ));
    }
    let word = |i: usize| match &tokens[i] {
        Token::Word(s) | Token::Quoted(s) => Ok(s.as_str()),
        other => Err(RuntimeError::UnparseableString(format!(
            "expected a word at position {i}, found '{other}'"
        ))),
    };
    let name = word(0)?;
    validate_record_name(name)?;
    let type_name = word(3)?;
    let driver = registry
        .lookup_by_name(type_name)
        .ok_or_else(|| RuntimeError::NotFound(format!("driver '{type_name}'")))?;
    let superclass = registry.superclass_name(driver.triple.superclass).unwrap_or_default();
    if word(1)? != superclass {
        return Err(RuntimeError::UnparseableString(format!(
            "driver '{type_name}' belongs to superclass '{superclass}', not '{}'",
            word(1)?
        )));
    }
    let class = registry.class_name(driver.triple.class).unwrap_or_default();
    if word(2)? != class {
        return Err(RuntimeError::UnparseableString(format!(
            "driver '{type_name}' belongs to class '{class}', not '{}'",
            word(2)?
        )));
    }
    Ok((name.to_string(), Arc::clone(driver)))
}

struct TokenStream<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> TokenStream<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn next(&mut self, field: &str) -> Result<&'t Token> {
        let token = self.tokens.get(self.pos).ok_or_else(|| {
            RuntimeError::UnparseableString(format!("description ended before field '{field}'"))
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, field: &str, want: &Token) -> Result<()> {
        let token = self.next(field)?;
        if token != want {
            return Err(RuntimeError::UnparseableString(format!(
                "field '{field}': expected '{want}', found '{token}'"
            )));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        match self.tokens.get(self.pos) {
            Some(extra) => Err(RuntimeError::UnparseableString(format!(
                "unexpected token '{extra}' after the last field"
            ))),
            None => Ok(()),
        }
    }
}

/// Which name table a record-type field is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeTable {
    Superclass,
    Class,
    Driver,
}

fn type_table(descriptor: &FieldDescriptor) -> TypeTable {
    match (descriptor.slot, descriptor.offset) {
        (StorageSlot::Record, rec::SUPERCLASS) => TypeTable::Superclass,
        (StorageSlot::Record, rec::CLASS) => TypeTable::Class,
        _ => TypeTable::Driver,
    }
}

pub struct ParseContext<'a> {
    list: &'a mut RecordList,
    record: RecordHandle,
    field: usize,
    table: TypeTable,
}

impl ParseContext<'_> {
    pub fn record(&self) -> RecordHandle {
        self.record
    }

    pub fn field(&self) -> usize {
        self.field
    }
}

pub struct UnparseContext<'a> {
    list: &'a RecordList,
    table: TypeTable,
}

/// Turns one value token into an element.
pub type TokenParser = fn(&mut ParseContext<'_>, &str) -> Result<Scalar>;
/// Renders one element as a token.
pub type TokenConstructor = fn(&UnparseContext<'_>, &Scalar) -> Result<String>;

fn bad_token(token: &str, what: FieldType) -> RuntimeError {
    RuntimeError::UnparseableString(format!("'{token}' is not a valid {what} value"))
}

fn mismatch(expected: FieldType, got: &Scalar) -> RuntimeError {
    RuntimeError::CorruptDataStructure(format!(
        "{expected} field holds a {} element",
        got.natural_type()
    ))
}

macro_rules! number_codec {
    ($parse:ident, $construct:ident, $ty:ty, $variant:ident) => {
        fn $parse(_: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
            token
                .parse::<$ty>()
                .map(Scalar::$variant)
                .map_err(|_| bad_token(token, FieldType::$variant))
        }

        fn $construct(_: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
            match value {
                Scalar::$variant(v) => Ok(v.to_string()),
                other => Err(mismatch(FieldType::$variant, other)),
            }
        }
    };
}

number_codec!(parse_char, construct_char, i8, Char);
number_codec!(parse_uchar, construct_uchar, u8, UChar);
number_codec!(parse_short, construct_short, i16, Short);
number_codec!(parse_ushort, construct_ushort, u16, UShort);
number_codec!(parse_long, construct_long, i64, Long);
number_codec!(parse_ulong, construct_ulong, u64, ULong);
number_codec!(parse_int64, construct_int64, i64, Int64);
number_codec!(parse_uint64, construct_uint64, u64, UInt64);

fn parse_string(_: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    Ok(Scalar::String(token.to_string()))
}

fn construct_string(_: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::String(s) => Ok(quote(s)),
        other => Err(mismatch(FieldType::String, other)),
    }
}

fn parse_bool(_: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    if token == "1" || token.eq_ignore_ascii_case("true") {
        Ok(Scalar::Bool(true))
    } else if token == "0" || token.eq_ignore_ascii_case("false") {
        Ok(Scalar::Bool(false))
    } else {
        Err(bad_token(token, FieldType::Bool))
    }
}

fn construct_bool(_: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        other => Err(mismatch(FieldType::Bool, other)),
    }
}

fn parse_float(_: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    token
        .parse::<f32>()
        .map(Scalar::Float)
        .map_err(|_| bad_token(token, FieldType::Float))
}

fn construct_float(_: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::Float(v) => Ok(format!("{v:?}")),
        other => Err(mismatch(FieldType::Float, other)),
    }
}

fn parse_double(_: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    token
        .parse::<f64>()
        .map(Scalar::Double)
        .map_err(|_| bad_token(token, FieldType::Double))
}

fn construct_double(_: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::Double(v) => Ok(format!("{v:?}")),
        other => Err(mismatch(FieldType::Double, other)),
    }
}

fn parse_hex(_: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16)
        .map(Scalar::ULong)
        .map_err(|_| bad_token(token, FieldType::Hex))
}

fn construct_hex(_: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::ULong(v) => Ok(format!("{v:#x}")),
        other => Err(mismatch(FieldType::Hex, other)),
    }
}

fn parse_record(ctx: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    if token == "NULL" {
        return Ok(Scalar::Record(None));
    }
    validate_record_name(token)?;
    let handle = ctx.list.reference_by_name(token, ctx.record, ctx.field)?;
    Ok(Scalar::Record(Some(handle)))
}

fn construct_record(ctx: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::Record(Some(h)) => Ok(ctx.list.name_of(*h)?.to_string()),
        Scalar::Record(None) => Ok("NULL".into()),
        other => Err(mismatch(FieldType::Record, other)),
    }
}

fn parse_record_type(ctx: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    let registry = ctx.list.registry();
    let id = match ctx.table {
        TypeTable::Superclass => registry.superclass_id(token),
        TypeTable::Class => registry.class_id(token),
        TypeTable::Driver => registry.lookup_by_name(token).map(|d| d.triple.type_id),
    };
    match id {
        Some(id) => Ok(Scalar::RecordType(id)),
        None => token
            .parse::<i64>()
            .map(Scalar::RecordType)
            .map_err(|_| RuntimeError::UnparseableString(format!("unknown record type '{token}'"))),
    }
}

fn construct_record_type(ctx: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    let Scalar::RecordType(id) = value else {
        return Err(mismatch(FieldType::RecordType, value));
    };
    let registry = ctx.list.registry();
    let name = match ctx.table {
        TypeTable::Superclass => registry.superclass_name(*id).map(str::to_string),
        TypeTable::Class => registry.class_name(*id).map(str::to_string),
        TypeTable::Driver => registry.lookup_by_type_id(*id).map(|d| d.name.clone()),
    };
    Ok(name.unwrap_or_else(|| id.to_string()))
}

fn parse_interface(ctx: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    if token == "NULL" {
        return Ok(Scalar::Interface(None));
    }
    let (record, address) = token.split_once(':').ok_or_else(|| {
        RuntimeError::UnparseableString(format!("interface '{token}' is not of the form record:address"))
    })?;
    validate_record_name(record)?;
    validate_token_name("interface address", address, INTERFACE_ADDRESS_NAME_LENGTH)?;
    let handle = ctx.list.reference_by_name(record, ctx.record, ctx.field)?;
    Ok(Scalar::Interface(Some(InterfaceRef {
        record: handle,
        address_name: address.to_string(),
    })))
}

fn construct_interface(ctx: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::Interface(Some(i)) => Ok(format!("{}:{}", ctx.list.name_of(i.record)?, i.address_name)),
        Scalar::Interface(None) => Ok("NULL".into()),
        other => Err(mismatch(FieldType::Interface, other)),
    }
}

fn parse_record_field(ctx: &mut ParseContext<'_>, token: &str) -> Result<Scalar> {
    if token == "NULL" {
        return Ok(Scalar::RecordField(None));
    }
    let (record, field) = token.split_once('.').ok_or_else(|| {
        RuntimeError::UnparseableString(format!("record field '{token}' is not of the form record.field"))
    })?;
    validate_record_name(record)?;
    validate_token_name("field name", field, FIELD_NAME_LENGTH)?;
    let handle = ctx.list.reference_by_name(record, ctx.record, ctx.field)?;
    Ok(Scalar::RecordField(Some(FieldRef {
        record: handle,
        field_name: field.to_string(),
    })))
}

fn construct_record_field(ctx: &UnparseContext<'_>, value: &Scalar) -> Result<String> {
    match value {
        Scalar::RecordField(Some(f)) => Ok(format!("{}.{}", ctx.list.name_of(f.record)?, f.field_name)),
        Scalar::RecordField(None) => Ok("NULL".into()),
        other => Err(mismatch(FieldType::RecordField, other)),
    }
}

pub fn token_parser(datatype: FieldType) -> TokenParser {
    match datatype {
        FieldType::String => parse_string,
        FieldType::Char => parse_char,
        FieldType::UChar => parse_uchar,
        FieldType::Short => parse_short,
        FieldType::UShort => parse_ushort,
        FieldType::Bool => parse_bool,
        FieldType::Long => parse_long,
        FieldType::ULong => parse_ulong,
        FieldType::Float => parse_float,
        FieldType::Double => parse_double,
        FieldType::Hex => parse_hex,
        FieldType::Int64 => parse_int64,
        FieldType::UInt64 => parse_uint64,
        FieldType::Record => parse_record,
        FieldType::RecordType => parse_record_type,
        FieldType::Interface => parse_interface,
        FieldType::RecordField => parse_record_field,
    }
}

pub fn token_constructor(datatype: FieldType) -> TokenConstructor {
    match datatype {
        FieldType::String => construct_string,
        FieldType::Char => construct_char,
        FieldType::UChar => construct_uchar,
        FieldType::Short => construct_short,
        FieldType::UShort => construct_ushort,
        FieldType::Bool => construct_bool,
        FieldType::Long => construct_long,
        FieldType::ULong => construct_ulong,
        FieldType::Float => construct_float,
        FieldType::Double => construct_double,
        FieldType::Hex => construct_hex,
        FieldType::Int64 => construct_int64,
        FieldType::UInt64 => construct_uint64,
        FieldType::Record => construct_record,
        FieldType::RecordType => construct_record_type,
        FieldType::Interface => construct_interface,
        FieldType::RecordField => construct_record_field,
    }
}

/// When a shape is being resolved. While parsing, a field may only be sized by
/// fields that come before it in the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CookiePass {
    Parse,
    Deferred,
}

fn cookie_value(
    record: &Record,
    index: usize,
    source: usize,
    array_index: usize,
    pass: CookiePass,
) -> Result<usize> {
    let field = &record.descriptor(index)?.name;
    let target = record.descriptor(source)?;
    if pass == CookiePass::Parse && target.in_description() && source > index {
        return Err(RuntimeError::UnparseableString(format!(
            "field '{field}' is sized by '{}', which comes later in the description",
            target.name
        )));
    }
    if !record.instance(source)?.is_resolved() {
        return Err(RuntimeError::UnparseableString(format!(
            "field '{field}' is sized by unresolved field '{}'",
            target.name
        )));
    }
    let scalar = record.value(source)?.get(array_index).map_err(|_| {
        RuntimeError::UnparseableString(format!(
            "field '{field}' needs element {array_index} of '{}'",
            target.name
        ))
    })?;
    let n = scalar.as_i64().ok_or_else(|| {
        RuntimeError::UnparseableString(format!("'{}' does not hold an integer extent", target.name))
    })?;
    usize::try_from(n).map_err(|_| {
        RuntimeError::UnparseableString(format!(
            "negative extent {n} from '{}' for field '{field}'",
            target.name
        ))
    })
}

/// Concrete extents for field `index`, with every cookie replaced by its current value.
pub(crate) fn resolve_shape(record: &Record, index: usize, pass: CookiePass) -> Result<Vec<usize>> {
    let descriptor = record.descriptor(index)?;
    match &descriptor.dimensions {
        Dimensions::Extents(extents) => {
            let current = record.value(index)?.extents();
            extents
                .iter()
                .enumerate()
                .map(|(d, extent)| match extent {
                    Extent::Fixed(n) => Ok(*n),
                    Extent::Variable => Ok(current.get(d).copied().unwrap_or(0)),
                    Extent::FromField {
                        field_index,
                        array_index,
                    } => cookie_value(record, index, *field_index, *array_index, pass),
                })
                .collect()
        }
        Dimensions::FromFields {
            rank_field,
            extent_field,
        } => {
            let rank = cookie_value(record, index, *rank_field, 0, pass)?;
            if rank > MAX_DIMENSIONS {
                return Err(RuntimeError::WouldExceedLimit(format!(
                    "field '{}' asks for {rank} dimensions (maximum {MAX_DIMENSIONS})",
                    descriptor.name
                )));
            }
            (0..rank)
                .map(|k| cookie_value(record, index, *extent_field, k, pass))
                .collect()
        }
    }
}

/// Resolves every field whose shape could not be settled while parsing.
pub(crate) fn resolve_deferred_cookies(list: &mut RecordList, handle: RecordHandle) -> Result<()> {
    let pending: Vec<usize> = list
        .record(handle)?
        .fields
        .iter()
        .filter(|f| !f.is_resolved())
        .map(|f| f.index())
        .collect();
    for index in pending {
        let shape = resolve_shape(list.record(handle)?, index, CookiePass::Deferred)?;
        let record = list.record_mut(handle)?;
        record.value_mut(index)?.reshape(shape)?;
        record.instance_mut(index)?.resolved = true;
    }
    Ok(())
}

fn parse_group(
    ctx: &mut ParseContext<'_>,
    parser: TokenParser,
    stream: &mut TokenStream<'_>,
    field: &str,
    extents: &[usize],
    value: &mut FieldValue,
    next: &mut usize,
) -> Result<()> {
    let Some((&len, inner)) = extents.split_first() else {
        let text = match stream.next(field)? {
            Token::Word(s) | Token::Quoted(s) => s.as_str(),
            other => {
                return Err(RuntimeError::UnparseableString(format!(
                    "field '{field}': expected a value, found '{other}'"
                )))
            }
        };
        let scalar = parser(ctx, text)?;
        value.set(*next, scalar)?;
        *next += 1;
        return Ok(());
    };
    stream.expect(field, &Token::Open)?;
    for _ in 0..len {
        parse_group(ctx, parser, stream, field, inner, value, next)?;
    }
    stream.expect(field, &Token::Close)
}

fn parse_value(
    list: &mut RecordList,
    handle: RecordHandle,
    index: usize,
    descriptor: &FieldDescriptor,
    shape: Vec<usize>,
    stream: &mut TokenStream<'_>,
) -> Result<FieldValue> {
    let mut value = FieldValue::new(descriptor.datatype, shape)?;
    let element_extents = value.element_extents().to_vec();
    let mut ctx = ParseContext {
        list,
        record: handle,
        field: index,
        table: type_table(descriptor),
    };
    let mut next = 0;
    parse_group(
        &mut ctx,
        token_parser(descriptor.datatype),
        stream,
        &descriptor.name,
        &element_extents,
        &mut value,
        &mut next,
    )?;
    Ok(value)
}

/// Fills every description field of a freshly allocated record from `tokens`.
pub(crate) fn parse_description(list: &mut RecordList, handle: RecordHandle, tokens: &[Token]) -> Result<()> {
    let fields = Arc::clone(&list.record(handle)?.driver.fields);
    let mut stream = TokenStream::new(tokens);
    for (index, descriptor) in fields.iter().enumerate() {
        if !descriptor.in_description() {
            continue;
        }
        let shape = resolve_shape(list.record(handle)?, index, CookiePass::Parse)?;
        let value = parse_value(list, handle, index, descriptor, shape, &mut stream)?;
        let record = list.record_mut(handle)?;
        *record.value_mut(index)? = value;
        record.instance_mut(index)?.resolved = true;
    }
    stream.finish()
}

/// Parses `text` into one field of an existing record, at the field's current shape.
pub(crate) fn parse_field(list: &mut RecordList, handle: RecordHandle, index: usize, text: &str) -> Result<()> {
    let tokens = tokenize(text)?;
    let descriptor = list.record(handle)?.descriptor(index)?.clone();
    let shape = resolve_shape(list.record(handle)?, index, CookiePass::Deferred)?;
    let mut stream = TokenStream::new(&tokens);
    let value = parse_value(list, handle, index, &descriptor, shape, &mut stream)?;
    stream.finish()?;
    *list.record_mut(handle)?.value_mut(index)? = value;
    Ok(())
}

fn render_group(
    ctx: &UnparseContext<'_>,
    constructor: TokenConstructor,
    value: &FieldValue,
    extents: &[usize],
    next: &mut usize,
    out: &mut Vec<String>,
) -> Result<()> {
    let Some((&len, inner)) = extents.split_first() else {
        out.push(constructor(ctx, &value.get(*next)?)?);
        *next += 1;
        return Ok(());
    };
    out.push("(".into());
    for _ in 0..len {
        render_group(ctx, constructor, value, inner, next, out)?;
    }
    out.push(")".into());
    Ok(())
}

fn render_value(
    list: &RecordList,
    descriptor: &FieldDescriptor,
    value: &FieldValue,
    out: &mut Vec<String>,
) -> Result<()> {
    let ctx = UnparseContext {
        list,
        table: type_table(descriptor),
    };
    let mut next = 0;
    render_group(
        &ctx,
        token_constructor(descriptor.datatype),
        value,
        value.element_extents(),
        &mut next,
        out,
    )
}

fn render_fields(list: &RecordList, handle: RecordHandle, flag: FieldFlags) -> Result<String> {
    let record = list.record(handle)?;
    let mut words = Vec::new();
    for (index, descriptor) in record.descriptors().iter().enumerate() {
        if !descriptor.flags.contains(flag) {
            continue;
        }
        if index == rec::NAME {
            words.push(record.name().to_string());
            continue;
        }
        render_value(list, descriptor, record.value(index)?, &mut words)?;
    }
    Ok(words.join(" "))
}

/// Description line that recreates `handle` when parsed.
pub fn create_description(list: &RecordList, handle: RecordHandle) -> Result<String> {
    render_fields(list, handle, FieldFlags::IN_DESCRIPTION)
}

/// One-line summary built from the `IN_SUMMARY` fields.
pub fn summary(list: &RecordList, handle: RecordHandle) -> Result<String> {
    render_fields(list, handle, FieldFlags::IN_SUMMARY)
}

pub fn field_to_string(list: &RecordList, handle: RecordHandle, name: &str) -> Result<String> {
    let record = list.record(handle)?;
    let index = record.field_index(name)?;
    let mut words = Vec::new();
    render_value(list, record.descriptor(index)?, record.value(index)?, &mut words)?;
    Ok(words.join(" "))
}

fn json_scalar(ctx: &UnparseContext<'_>, datatype: FieldType, value: &Scalar) -> Result<Value> {
    Ok(match value {
        Scalar::String(v) => json!(v),
        Scalar::Char(v) => json!(v),
        Scalar::UChar(v) => json!(v),
        Scalar::Short(v) => json!(v),
        Scalar::UShort(v) => json!(v),
        Scalar::Bool(v) => json!(v),
        Scalar::Long(v) | Scalar::Int64(v) => json!(v),
        Scalar::ULong(v) if datatype == FieldType::Hex => json!(format!("{v:#x}")),
        Scalar::ULong(v) | Scalar::UInt64(v) => json!(v),
        Scalar::Float(v) => json!(v),
        Scalar::Double(v) => json!(v),
        Scalar::Record(None) | Scalar::Interface(None) | Scalar::RecordField(None) => Value::Null,
        Scalar::Record(_) | Scalar::RecordType(_) | Scalar::Interface(_) | Scalar::RecordField(_) => {
            json!(token_constructor(datatype)(ctx, value)?)
        }
    })
}

fn json_group(
    ctx: &UnparseContext<'_>,
    value: &FieldValue,
    extents: &[usize],
    next: &mut usize,
) -> Result<Value> {
    let Some((&len, inner)) = extents.split_first() else {
        let element = value.get(*next)?;
        *next += 1;
        return json_scalar(ctx, value.datatype(), &element);
    };
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(json_group(ctx, value, inner, next)?);
    }
    Ok(Value::Array(items))
}

/// JSON dump of every accessible field. References are written by name.
pub fn to_json(list: &RecordList, handle: RecordHandle) -> Result<Value> {
    let record = list.record(handle)?;
    let mut fields = serde_json::Map::new();
    for (index, descriptor) in record.descriptors().iter().enumerate() {
        if descriptor.flags.contains(FieldFlags::NO_ACCESS) {
            continue;
        }
        let value = record.value(index)?;
        let ctx = UnparseContext {
            list,
            table: type_table(descriptor),
        };
        let mut next = 0;
        fields.insert(
            descriptor.name.clone(),
            json_group(&ctx, value, value.element_extents(), &mut next)?,
        );
    }
    Ok(json!({
        "name": record.name(),
        "driver": record.driver.name,
        "state": format!("{:?}", record.state()),
        "last_update": record.last_update().and_then(|t| t.to_rfc3339()),
        "fields": fields,
    }))
}

/// Generic report: one line per accessible field.
pub fn write_field_report(list: &RecordList, handle: RecordHandle, out: &mut dyn fmt::Write) -> Result<()> {
    let fmt_error = |_: fmt::Error| RuntimeError::FunctionFailed("writing record report".into());
    let record = list.record(handle)?;
    writeln!(
        out,
        "Record '{}' ({}, {:?}):",
        record.name(),
        record.driver.name,
        record.state()
    )
    .map_err(fmt_error)?;
    for (index, descriptor) in record.descriptors().iter().enumerate() {
        if descriptor.flags.contains(FieldFlags::NO_ACCESS) {
            continue;
        }
        let mut words = Vec::new();
        render_value(list, descriptor, record.value(index)?, &mut words)?;
        writeln!(out, "  {:<24} = {}", descriptor.name, words.join(" ")).map_err(fmt_error)?;
    }
    Ok(())
}
