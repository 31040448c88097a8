//! Record transformer: one raw source line in, one [`Record`] or a skip out.
//!
//! Source lines are JSON objects in the Open Food Facts export shape. Only
//! `code` and a product name are required; every other field degrades to
//! "absent" rather than failing the line. Numbers are accepted either as
//! JSON numbers or as numeric strings, which both occur in real dumps.
//!
//! The transformer is a pure function. It never touches the store and the
//! same input always yields the same output, so callers may retry freely.

use serde_json::{Map, Value};

use crate::models::{Grades, Nutrients, Record};

/// Completeness above which a record with all four macros is considered complete.
pub const COMPLETENESS_THRESHOLD: f64 = 0.8;

/// Why a line did not produce a record. Skips are counted, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("line is not a decodable JSON object")]
    Decode,
    #[error("line has no product code")]
    MissingCode,
    #[error("line has no product name")]
    MissingName,
}

/// Transform one raw line into a [`Record`].
///
/// The line may still carry its `\n` / `\r\n` terminator; it is stripped
/// before decoding and is not part of `raw_data`.
pub fn transform_line(line: &[u8]) -> Result<Record, SkipReason> {
    let line = trim_line_end(line);
    let text = std::str::from_utf8(line).map_err(|_| SkipReason::Decode)?;
    let value: Value = serde_json::from_str(text).map_err(|_| SkipReason::Decode)?;
    let obj = value.as_object().ok_or(SkipReason::Decode)?;

    let id = text_field(obj, "code").ok_or(SkipReason::MissingCode)?;
    let name = text_field(obj, "product_name")
        .or_else(|| text_field(obj, "product_name_en"))
        .ok_or(SkipReason::MissingName)?;

    let brands = text_field(obj, "brands");
    let category_tags = tag_list(obj, "categories_tags");
    let label_tags = tag_list(obj, "labels_tags");
    let categories =
        text_field(obj, "categories").or_else(|| joined_tags(&category_tags, ", "));
    let countries = text_field(obj, "countries")
        .or_else(|| joined_tags(&tag_list(obj, "countries_tags"), ", "));

    let nutrients = obj
        .get("nutriments")
        .and_then(Value::as_object)
        .map(nutrients_from)
        .unwrap_or_default();

    let grades = Grades {
        nutriscore: text_field(obj, "nutriscore_grade"),
        nova_group: text_field(obj, "nova_group"),
        ecoscore: text_field(obj, "ecoscore_grade"),
    };

    let raw_completeness = obj
        .get("completeness")
        .and_then(number_value)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.0);
    let complete_macros = nutrients.has_macros() && raw_completeness > COMPLETENESS_THRESHOLD;
    let completeness = if complete_macros { 1.0 } else { raw_completeness };

    let last_modified_t = obj
        .get("last_modified_t")
        .and_then(number_value)
        .map(|t| t as i64)
        .unwrap_or(0);

    let search_text = build_search_text(&name, brands.as_deref(), &id, &category_tags, &label_tags);

    Ok(Record {
        id,
        name,
        brands,
        categories,
        countries,
        nutrients,
        grades,
        completeness,
        complete_macros,
        last_modified_t,
        raw_data: text.to_string(),
        search_text,
    })
}

/// Space-join name, brands, code, and the flattened category and label tags,
/// dropping empty parts.
pub fn build_search_text(
    name: &str,
    brands: Option<&str>,
    code: &str,
    category_tags: &[String],
    label_tags: &[String],
) -> String {
    let flattened = category_tags
        .iter()
        .chain(label_tags.iter())
        .map(|tag| flatten_tag(tag));

    [name.to_string(), brands.unwrap_or("").to_string(), code.to_string()]
        .into_iter()
        .chain(flattened)
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"en:dark-chocolates"` → `"dark chocolates"`.
pub fn flatten_tag(tag: &str) -> String {
    let bare = match tag.split_once(':') {
        Some((lang, rest)) if !lang.is_empty() && lang.len() <= 3 => rest,
        _ => tag,
    };
    bare.replace(['-', '_'], " ").trim().to_string()
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

fn nutrients_from(map: &Map<String, Value>) -> Nutrients {
    let get = |key: &str| map.get(key).and_then(number_value);
    Nutrients {
        energy_kcal: get("energy-kcal_100g"),
        fat: get("fat_100g"),
        saturated_fat: get("saturated-fat_100g"),
        carbohydrates: get("carbohydrates_100g"),
        sugars: get("sugars_100g"),
        proteins: get("proteins_100g"),
        salt: get("salt_100g"),
        fiber: get("fiber_100g"),
    }
}

/// Non-empty trimmed string; numbers are rendered in their JSON form.
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match obj.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn number_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn tag_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn joined_tags(tags: &[String], sep: &str) -> Option<String> {
    let flat: Vec<String> = tags
        .iter()
        .map(|t| flatten_tag(t))
        .filter(|t| !t.is_empty())
        .collect();
    (!flat.is_empty()).then(|| flat.join(sep))
}
