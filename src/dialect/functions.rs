/// ClickHouse builtin -> DuckDB replacement rules.
///
/// Each rule receives the raw, already-split argument texts of one call site
/// and returns the replacement text for the whole call. Rules never fail:
/// a missing argument is rendered as `NULL` so the output stays valid SQL.
use super::scanner::{quote_literal, unquote_literal};

/// How a matched call is rewritten.
#[derive(Clone, Copy)]
pub enum Replacement {
    /// Same arguments, different function name.
    Rename(&'static str),
    /// `date_trunc('<unit>', x)`.
    Truncate(&'static str),
    /// `CAST(date_trunc('<unit>', x) AS DATE)`.
    TruncateToDate(&'static str),
    /// `time_bucket(INTERVAL '<width>', x)`.
    Bucket(&'static str),
    /// `<fn>(x)` for date-part extraction.
    DatePart(&'static str),
    /// `CAST(x AS <type>)`.
    Cast(&'static str),
    /// `COALESCE(TRY_CAST(x AS <type>), 0)`.
    CastOrZero(&'static str),
    /// `TRY_CAST(x AS <type>)`.
    CastOrNull(&'static str),
    /// `<AGG>(x) FILTER (WHERE cond)`.
    FilteredAggregate(&'static str),
    /// `COALESCE(TRY_CAST(json_extract_string(j, path) AS <type>), <default>)`.
    JsonScalar(&'static str, &'static str),
    /// Fixed text regardless of arguments.
    Constant(&'static str),
    Custom(fn(&[String]) -> String),
}

pub struct FunctionRule {
    pub name: &'static str,
    /// SQL-standard builtins match case-insensitively; camelCase ClickHouse
    /// builtins are case-sensitive.
    pub case_insensitive: bool,
    pub replacement: Replacement,
}

impl FunctionRule {
    const fn new(name: &'static str, replacement: Replacement) -> Self {
        Self {
            name,
            case_insensitive: false,
            replacement,
        }
    }

    const fn any_case(name: &'static str, replacement: Replacement) -> Self {
        Self {
            name,
            case_insensitive: true,
            replacement,
        }
    }

    pub fn apply(&self, args: &[String]) -> String {
        use Replacement::*;
        match self.replacement {
            Rename(target) => format!("{}({})", target, args.join(", ")),
            Truncate(unit) => format!("date_trunc('{}', {})", unit, arg(args, 0)),
            TruncateToDate(unit) => {
                format!("CAST(date_trunc('{}', {}) AS DATE)", unit, arg(args, 0))
            }
            Bucket(width) => format!("time_bucket(INTERVAL '{}', {})", width, arg(args, 0)),
            DatePart(part) => format!("{}({})", part, arg(args, 0)),
            Cast(ty) => format!("CAST({} AS {})", arg(args, 0), ty),
            CastOrZero(ty) => format!("COALESCE(TRY_CAST({} AS {}), 0)", arg(args, 0), ty),
            CastOrNull(ty) => format!("TRY_CAST({} AS {})", arg(args, 0), ty),
            FilteredAggregate(agg) => filtered(agg, arg(args, 0), arg(args, 1)),
            JsonScalar(ty, default) => format!(
                "COALESCE(TRY_CAST(json_extract_string({}, {}) AS {}), {})",
                arg(args, 0),
                json_path(args.get(1..).unwrap_or_default()),
                ty,
                default
            ),
            Constant(text) => text.to_string(),
            Custom(f) => f(args),
        }
    }
}

/// Argument `i`, or `NULL` when the call is short.
fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map(String::as_str).unwrap_or("NULL")
}

fn filtered(agg: &str, value: &str, cond: &str) -> String {
    format!("{}({}) FILTER (WHERE {})", agg, value, cond)
}

const CURRENT_TIMESTAMP: &str = "CAST(get_current_timestamp() AS TIMESTAMP)";
const CURRENT_DATE: &str = "CAST(CAST(get_current_timestamp() AS TIMESTAMP) AS DATE)";
const YESTERDAY: &str = "(CAST(CAST(get_current_timestamp() AS TIMESTAMP) AS DATE) - 1)";

/// Rules applied by the builtin pass, in order.
pub static FUNCTION_RULES: &[FunctionRule] = &[
    // Time bucketing
    FunctionRule::new("toStartOfMinute", Replacement::Truncate("minute")),
    FunctionRule::new("toStartOfFiveMinutes", Replacement::Bucket("5 minutes")),
    FunctionRule::new("toStartOfFiveMinute", Replacement::Bucket("5 minutes")),
    FunctionRule::new("toStartOfTenMinutes", Replacement::Bucket("10 minutes")),
    FunctionRule::new("toStartOfFifteenMinutes", Replacement::Bucket("15 minutes")),
    FunctionRule::new("toStartOfHour", Replacement::Truncate("hour")),
    FunctionRule::new("toStartOfDay", Replacement::Truncate("day")),
    FunctionRule::new("toStartOfWeek", Replacement::Custom(start_of_week)),
    FunctionRule::new("toMonday", Replacement::TruncateToDate("week")),
    FunctionRule::new("toStartOfMonth", Replacement::TruncateToDate("month")),
    FunctionRule::new("toStartOfQuarter", Replacement::TruncateToDate("quarter")),
    FunctionRule::new("toStartOfYear", Replacement::TruncateToDate("year")),
    FunctionRule::new("toStartOfInterval", Replacement::Custom(start_of_interval)),
    FunctionRule::new("toDateTime64", Replacement::Cast("TIMESTAMP")),
    FunctionRule::new("toDateTime", Replacement::Cast("TIMESTAMP")),
    FunctionRule::new("toDate", Replacement::Cast("DATE")),
    FunctionRule::new("parseDateTimeBestEffort", Replacement::Cast("TIMESTAMP")),
    FunctionRule::new("toHour", Replacement::DatePart("hour")),
    FunctionRule::new("toMinute", Replacement::DatePart("minute")),
    FunctionRule::new("toYear", Replacement::DatePart("year")),
    FunctionRule::new("toMonth", Replacement::DatePart("month")),
    FunctionRule::new("toDayOfMonth", Replacement::DatePart("day")),
    FunctionRule::new("toDayOfWeek", Replacement::DatePart("isodow")),
    FunctionRule::new("toYYYYMM", Replacement::Custom(yyyymm)),
    FunctionRule::new("toUnixTimestamp", Replacement::Custom(unix_timestamp)),
    // `now()` is TIMESTAMPTZ and `current_date` needs ICU; stay on naive UTC.
    FunctionRule::any_case("now", Replacement::Constant(CURRENT_TIMESTAMP)),
    FunctionRule::new("now64", Replacement::Constant(CURRENT_TIMESTAMP)),
    FunctionRule::new("today", Replacement::Constant(CURRENT_DATE)),
    FunctionRule::new("yesterday", Replacement::Constant(YESTERDAY)),
    FunctionRule::new("dateDiff", Replacement::Rename("date_diff")),
    // Casts
    FunctionRule::new("toString", Replacement::Cast("VARCHAR")),
    FunctionRule::new("toInt8", Replacement::Cast("TINYINT")),
    FunctionRule::new("toInt16", Replacement::Cast("SMALLINT")),
    FunctionRule::new("toInt32OrZero", Replacement::CastOrZero("INTEGER")),
    FunctionRule::new("toInt32OrNull", Replacement::CastOrNull("INTEGER")),
    FunctionRule::new("toInt32", Replacement::Cast("INTEGER")),
    FunctionRule::new("toInt64OrZero", Replacement::CastOrZero("BIGINT")),
    FunctionRule::new("toInt64OrNull", Replacement::CastOrNull("BIGINT")),
    FunctionRule::new("toInt64", Replacement::Cast("BIGINT")),
    FunctionRule::new("toUInt8", Replacement::Cast("UTINYINT")),
    FunctionRule::new("toUInt16", Replacement::Cast("USMALLINT")),
    FunctionRule::new("toUInt32OrZero", Replacement::CastOrZero("UINTEGER")),
    FunctionRule::new("toUInt32", Replacement::Cast("UINTEGER")),
    FunctionRule::new("toUInt64OrZero", Replacement::CastOrZero("UBIGINT")),
    FunctionRule::new("toUInt64", Replacement::Cast("UBIGINT")),
    FunctionRule::new("toFloat32", Replacement::Cast("FLOAT")),
    FunctionRule::new("toFloat64OrZero", Replacement::CastOrZero("DOUBLE")),
    FunctionRule::new("toFloat64OrNull", Replacement::CastOrNull("DOUBLE")),
    FunctionRule::new("toFloat64", Replacement::Cast("DOUBLE")),
    FunctionRule::new("toUUID", Replacement::Cast("UUID")),
    // Conditional aggregates
    FunctionRule::new("countIf", Replacement::Custom(count_if)),
    FunctionRule::new("sumIf", Replacement::Custom(sum_if)),
    FunctionRule::new("avgIf", Replacement::FilteredAggregate("AVG")),
    FunctionRule::new("minIf", Replacement::FilteredAggregate("MIN")),
    FunctionRule::new("maxIf", Replacement::FilteredAggregate("MAX")),
    FunctionRule::new("uniqIf", Replacement::Custom(uniq_if)),
    FunctionRule::new("uniqExactIf", Replacement::Custom(uniq_if)),
    FunctionRule::new("argMinIf", Replacement::Custom(arg_min_if)),
    FunctionRule::new("argMaxIf", Replacement::Custom(arg_max_if)),
    // Other aggregates
    FunctionRule::new("uniqExact", Replacement::Custom(uniq)),
    FunctionRule::new("uniqCombined", Replacement::Custom(uniq)),
    FunctionRule::new("uniqHLL12", Replacement::Custom(uniq)),
    FunctionRule::new("uniq", Replacement::Custom(uniq)),
    FunctionRule::new("argMin", Replacement::Rename("arg_min")),
    FunctionRule::new("argMax", Replacement::Rename("arg_max")),
    FunctionRule::new("anyLast", Replacement::Rename("last")),
    FunctionRule::new("any", Replacement::Rename("any_value")),
    FunctionRule::new("groupUniqArray", Replacement::Custom(group_uniq_array)),
    FunctionRule::new("groupArray", Replacement::Rename("list")),
    // JSON accessors
    FunctionRule::new("JSONExtractString", Replacement::Custom(json_extract_string)),
    FunctionRule::new("visitParamExtractString", Replacement::Custom(json_extract_string)),
    FunctionRule::new("simpleJSONExtractString", Replacement::Custom(json_extract_string)),
    FunctionRule::new("JSONExtractInt", Replacement::JsonScalar("BIGINT", "0")),
    FunctionRule::new("JSONExtractUInt", Replacement::JsonScalar("UBIGINT", "0")),
    FunctionRule::new("JSONExtractFloat", Replacement::JsonScalar("DOUBLE", "0")),
    FunctionRule::new("JSONExtractBool", Replacement::JsonScalar("BOOLEAN", "false")),
    FunctionRule::new("JSONExtractRaw", Replacement::Custom(json_extract_raw)),
    FunctionRule::new("JSONHas", Replacement::Custom(json_has)),
    FunctionRule::new("JSONExtractKeys", Replacement::Custom(json_keys)),
    // URL helpers
    FunctionRule::new("domainWithoutWWW", Replacement::Custom(domain_without_www)),
    FunctionRule::new("domain", Replacement::Custom(domain)),
    FunctionRule::new("protocol", Replacement::Custom(protocol)),
    FunctionRule::new("path", Replacement::Custom(url_path)),
    FunctionRule::new("queryString", Replacement::Custom(query_string)),
    FunctionRule::new("extractURLParameter", Replacement::Custom(extract_url_parameter)),
    // Strings
    FunctionRule::new("match", Replacement::Rename("regexp_matches")),
    FunctionRule::new("replaceRegexpAll", Replacement::Custom(replace_regexp_all)),
    FunctionRule::new("replaceRegexpOne", Replacement::Custom(replace_regexp_one)),
    FunctionRule::new("replaceAll", Replacement::Rename("replace")),
    FunctionRule::new("lowerUTF8", Replacement::Rename("lower")),
    FunctionRule::new("upperUTF8", Replacement::Rename("upper")),
    FunctionRule::new("lengthUTF8", Replacement::Rename("length")),
    FunctionRule::new("positionCaseInsensitive", Replacement::Custom(position_ci)),
    FunctionRule::new("splitByChar", Replacement::Custom(split_by)),
    FunctionRule::new("splitByString", Replacement::Custom(split_by)),
    // Emptiness and null checks
    FunctionRule::new("notEmpty", Replacement::Custom(not_empty)),
    FunctionRule::new("empty", Replacement::Custom(empty)),
    FunctionRule::new("isNotNull", Replacement::Custom(is_not_null)),
    FunctionRule::new("isNull", Replacement::Custom(is_null)),
    // Conditionals and arithmetic
    FunctionRule::new("multiIf", Replacement::Custom(multi_if)),
    FunctionRule::any_case("if", Replacement::Custom(if_then_else)),
    FunctionRule::new("ifNull", Replacement::Rename("COALESCE")),
    FunctionRule::new("intDiv", Replacement::Custom(int_div)),
    // Arrays
    FunctionRule::new("hasAny", Replacement::Rename("list_has_any")),
    FunctionRule::new("has", Replacement::Rename("list_contains")),
    FunctionRule::new("indexOf", Replacement::Custom(index_of)),
    FunctionRule::new("arrayCompact", Replacement::Custom(array_compact)),
    FunctionRule::new("arraySlice", Replacement::Custom(array_slice)),
    FunctionRule::new("arrayFlatten", Replacement::Rename("flatten")),
    FunctionRule::new("arrayDistinct", Replacement::Rename("list_distinct")),
    FunctionRule::new("arraySort", Replacement::Rename("list_sort")),
    FunctionRule::new("arrayReverse", Replacement::Rename("list_reverse")),
    FunctionRule::new("arrayStringConcat", Replacement::Custom(array_string_concat)),
    FunctionRule::new("arrayFilter", Replacement::Custom(array_filter)),
    FunctionRule::new("arrayMap", Replacement::Custom(array_map)),
];

/// Map a ClickHouse type name to its DuckDB spelling.
///
/// Wrapper types are unwrapped; unknown names fall back to `VARCHAR`.
pub fn duckdb_type(name: &str) -> String {
    let name = name.trim();
    for wrapper in ["Nullable", "LowCardinality"] {
        if let Some(inner) = unwrap_type(name, wrapper) {
            return duckdb_type(inner);
        }
    }
    if let Some(inner) = unwrap_type(name, "Array") {
        return format!("{}[]", duckdb_type(inner));
    }
    let base = name.split('(').next().unwrap_or(name);
    match base {
        "String" | "FixedString" | "Enum8" | "Enum16" => "VARCHAR",
        "Int8" => "TINYINT",
        "Int16" => "SMALLINT",
        "Int32" => "INTEGER",
        "Int64" => "BIGINT",
        "Int128" | "Int256" => "HUGEINT",
        "UInt8" => "UTINYINT",
        "UInt16" => "USMALLINT",
        "UInt32" => "UINTEGER",
        "UInt64" => "UBIGINT",
        "Float32" => "FLOAT",
        "Float64" => "DOUBLE",
        "Bool" | "Boolean" => "BOOLEAN",
        "Date" | "Date32" => "DATE",
        "DateTime" | "DateTime64" => "TIMESTAMP",
        "UUID" => "UUID",
        _ => "VARCHAR",
    }
    .to_string()
}

/// `Wrapper(Inner)` -> `Inner`.
pub(crate) fn unwrap_type<'a>(name: &'a str, wrapper: &str) -> Option<&'a str> {
    name.strip_prefix(wrapper)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

fn start_of_week(args: &[String]) -> String {
    let value = arg(args, 0);
    // Odd modes start the week on Monday; mode 0 (the default) on Sunday.
    let monday_first = args
        .get(1)
        .and_then(|m| m.trim().parse::<i64>().ok())
        .map_or(false, |m| m % 2 == 1);
    if monday_first {
        format!("CAST(date_trunc('week', {}) AS DATE)", value)
    } else {
        format!(
            "(CAST({v} AS DATE) - CAST(dayofweek({v}) AS INTEGER))",
            v = value
        )
    }
}

fn start_of_interval(args: &[String]) -> String {
    format!("time_bucket({}, {})", arg(args, 1), arg(args, 0))
}

fn yyyymm(args: &[String]) -> String {
    let v = arg(args, 0);
    format!("(year({v}) * 100 + month({v}))", v = v)
}

fn unix_timestamp(args: &[String]) -> String {
    format!("CAST(epoch({}) AS BIGINT)", arg(args, 0))
}

/// Strip a leading `DISTINCT` keyword from an aggregate argument.
fn strip_distinct(value: &str) -> Option<&str> {
    let head = value.get(..8)?;
    if !head.eq_ignore_ascii_case("DISTINCT") {
        return None;
    }
    let rest = &value[8..];
    if rest.starts_with(|c: char| c.is_ascii_whitespace() || c == '(') {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn count_if(args: &[String]) -> String {
    match args {
        [] => "COUNT(*) FILTER (WHERE NULL)".to_string(),
        [cond] => format!("COUNT(*) FILTER (WHERE {})", cond),
        [value, cond, ..] => match strip_distinct(value) {
            Some(inner) => format!("COUNT(DISTINCT CASE WHEN {} THEN {} END)", cond, inner),
            None => format!("COUNT(CASE WHEN {} THEN {} END)", cond, value),
        },
    }
}

fn sum_if(args: &[String]) -> String {
    // ClickHouse sums over no rows are 0, not NULL.
    format!("COALESCE({}, 0)", filtered("SUM", arg(args, 0), arg(args, 1)))
}

fn uniq_if(args: &[String]) -> String {
    format!(
        "COUNT(DISTINCT CASE WHEN {} THEN {} END)",
        arg(args, 1),
        arg(args, 0)
    )
}

fn arg_min_if(args: &[String]) -> String {
    format!(
        "arg_min({}, {}) FILTER (WHERE {})",
        arg(args, 0),
        arg(args, 1),
        arg(args, 2)
    )
}

fn arg_max_if(args: &[String]) -> String {
    format!(
        "arg_max({}, {}) FILTER (WHERE {})",
        arg(args, 0),
        arg(args, 1),
        arg(args, 2)
    )
}

fn uniq(args: &[String]) -> String {
    match args {
        [] => "COUNT(DISTINCT NULL)".to_string(),
        [value] => format!("COUNT(DISTINCT {})", value),
        many => format!("COUNT(DISTINCT ({}))", many.join(", ")),
    }
}

fn group_uniq_array(args: &[String]) -> String {
    format!("list(DISTINCT {})", arg(args, 0))
}

/// Build a DuckDB JSON path from ClickHouse `JSONExtract*` key arguments.
///
/// String literals become object keys, integer literals become 0-based array
/// indexes (ClickHouse indexes from 1, negative from the end). Any other
/// expression makes the path dynamic and it is assembled with `||`.
pub fn json_path(keys: &[String]) -> String {
    let mut literal = String::from("$");
    let mut pieces: Vec<String> = Vec::new();

    for key in keys {
        if let Some(name) = unquote_literal(key) {
            literal.push_str(&key_segment(&name));
        } else if let Ok(index) = key.trim().parse::<i64>() {
            literal.push_str(&index_segment(index));
        } else {
            if !literal.is_empty() {
                pieces.push(quote_literal(&literal));
                literal.clear();
            }
            pieces.push(format!("'.' || ({})", key));
        }
    }

    if pieces.is_empty() {
        return quote_literal(&literal);
    }
    if !literal.is_empty() {
        pieces.push(quote_literal(&literal));
    }
    format!("({})", pieces.join(" || "))
}

fn key_segment(name: &str) -> String {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        format!(".{}", name)
    } else {
        format!(".\"{}\"", name.replace('"', "\\\""))
    }
}

fn index_segment(index: i64) -> String {
    match index {
        i if i > 0 => format!("[{}]", i - 1),
        i if i < 0 => format!("[#{}]", i),
        // ClickHouse treats index 0 as "no such element".
        _ => "[#]".to_string(),
    }
}

fn json_extract_string(args: &[String]) -> String {
    format!(
        "json_extract_string({}, {})",
        arg(args, 0),
        json_path(args.get(1..).unwrap_or_default())
    )
}

fn json_extract_raw(args: &[String]) -> String {
    format!(
        "CAST(json_extract({}, {}) AS VARCHAR)",
        arg(args, 0),
        json_path(args.get(1..).unwrap_or_default())
    )
}

fn json_has(args: &[String]) -> String {
    format!(
        "(json_extract({}, {}) IS NOT NULL)",
        arg(args, 0),
        json_path(args.get(1..).unwrap_or_default())
    )
}

fn json_keys(args: &[String]) -> String {
    match args.get(1..) {
        Some(keys) if !keys.is_empty() => {
            format!("json_keys({}, {})", arg(args, 0), json_path(keys))
        }
        _ => format!("json_keys({})", arg(args, 0)),
    }
}

const DOMAIN_PATTERN: &str = r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://)?(?:[^@/?#]*@)?([^/:?#]*)";
const PROTOCOL_PATTERN: &str = r"^([A-Za-z][A-Za-z0-9+.\-]*)://";
const PATH_PATTERN: &str = r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://[^/?#]*)?([^?#]*)";
const QUERY_PATTERN: &str = r"\?([^#]*)";

fn domain(args: &[String]) -> String {
    format!("regexp_extract({}, '{}', 1)", arg(args, 0), DOMAIN_PATTERN)
}

fn domain_without_www(args: &[String]) -> String {
    format!("regexp_replace({}, '^www\\.', '')", domain(args))
}

fn protocol(args: &[String]) -> String {
    format!("regexp_extract({}, '{}', 1)", arg(args, 0), PROTOCOL_PATTERN)
}

fn url_path(args: &[String]) -> String {
    format!("regexp_extract({}, '{}', 1)", arg(args, 0), PATH_PATTERN)
}

fn query_string(args: &[String]) -> String {
    format!("regexp_extract({}, '{}', 1)", arg(args, 0), QUERY_PATTERN)
}

fn extract_url_parameter(args: &[String]) -> String {
    format!(
        "regexp_extract({}, '[?&]' || {} || '=([^&#]*)', 1)",
        arg(args, 0),
        arg(args, 1)
    )
}

fn replace_regexp_all(args: &[String]) -> String {
    format!(
        "regexp_replace({}, {}, {}, 'g')",
        arg(args, 0),
        arg(args, 1),
        args.get(2).map(String::as_str).unwrap_or("''")
    )
}

fn replace_regexp_one(args: &[String]) -> String {
    format!(
        "regexp_replace({}, {}, {})",
        arg(args, 0),
        arg(args, 1),
        args.get(2).map(String::as_str).unwrap_or("''")
    )
}

fn position_ci(args: &[String]) -> String {
    format!("strpos(lower({}), lower({}))", arg(args, 0), arg(args, 1))
}

fn split_by(args: &[String]) -> String {
    format!(
        "string_split({}, {})",
        arg(args, 1),
        args.first().map(String::as_str).unwrap_or("''")
    )
}

fn empty(args: &[String]) -> String {
    format!("(coalesce(length({}), 0) = 0)", arg(args, 0))
}

fn not_empty(args: &[String]) -> String {
    format!("(coalesce(length({}), 0) > 0)", arg(args, 0))
}

fn is_null(args: &[String]) -> String {
    format!("({} IS NULL)", arg(args, 0))
}

fn is_not_null(args: &[String]) -> String {
    format!("({} IS NOT NULL)", arg(args, 0))
}

fn if_then_else(args: &[String]) -> String {
    format!(
        "CASE WHEN {} THEN {} ELSE {} END",
        arg(args, 0),
        arg(args, 1),
        arg(args, 2)
    )
}

fn multi_if(args: &[String]) -> String {
    if args.is_empty() {
        return "NULL".to_string();
    }
    let mut out = String::from("CASE");
    let mut pairs = args.chunks_exact(2);
    for pair in pairs.by_ref() {
        out.push_str(&format!(" WHEN {} THEN {}", pair[0], pair[1]));
    }
    let fallback = pairs.remainder().first().map(String::as_str).unwrap_or("NULL");
    if args.len() < 2 {
        // A lone argument is the fallback with no branches.
        return fallback.to_string();
    }
    out.push_str(&format!(" ELSE {} END", fallback));
    out
}

fn int_div(args: &[String]) -> String {
    format!("({} // {})", arg(args, 0), arg(args, 1))
}

fn index_of(args: &[String]) -> String {
    format!(
        "COALESCE(list_position({}, {}), 0)",
        arg(args, 0),
        arg(args, 1)
    )
}

fn array_compact(args: &[String]) -> String {
    let list = arg(args, 0);
    format!(
        "list_filter({l}, (__e, __i) -> __i = 1 OR __e IS DISTINCT FROM ({l})[__i - 1])",
        l = list
    )
}

fn array_slice(args: &[String]) -> String {
    let list = arg(args, 0);
    let offset = arg(args, 1);
    match args.get(2) {
        Some(length) => format!(
            "list_slice({}, {}, ({}) + ({}) - 1)",
            list, offset, offset, length
        ),
        None => format!("list_slice({l}, {}, len({l}))", offset, l = list),
    }
}

fn array_string_concat(args: &[String]) -> String {
    format!(
        "array_to_string({}, {})",
        arg(args, 0),
        args.get(1).map(String::as_str).unwrap_or("''")
    )
}

fn array_filter(args: &[String]) -> String {
    format!("list_filter({}, {})", arg(args, 1), arg(args, 0))
}

fn array_map(args: &[String]) -> String {
    format!("list_transform({}, {})", arg(args, 1), arg(args, 0))
}
