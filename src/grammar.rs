pub const FIELD_COUNT: usize = 5;
pub const DELIMITER: &str = "_";

pub const FIELD_LABELS: [&str; FIELD_COUNT] = [
    "Item Code",
    "Brand",
    "Product + Variant",
    "Dimensions",
    "No. of Colours",
];

pub const STANDARD_PARSE_NOTE: &str = "Standard 5-part parse (Product+Variant combined).";

pub type Fields = [String; FIELD_COUNT];

pub fn empty_fields() -> Fields {
    Default::default()
}

/// True when every field carries a value; anything less is low-confidence.
pub fn is_complete(fields: &Fields) -> bool {
    fields.iter().all(|field| !field.is_empty())
}

/// Split `name` into `(stem, extension)`; the extension keeps its dot.
/// Leading dots never start an extension, so `.hidden` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if !name[..idx].trim_start_matches('.').is_empty() => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Canonical filename for a set of fields.
pub fn target_filename(fields: &Fields, extension: &str) -> String {
    let mut name = fields.join(DELIMITER);
    name.push_str(extension);
    name
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarParse {
    pub fields: Fields,
    pub notes: String,
}

/// Parse `filename` as `ItemCode_Brand_Product+Variant_Dimensions_NoOfColours.ext`.
/// Item code and brand come from the left, dimensions and colours from the
/// right; Product+Variant is the middle and may keep underscores of its own.
/// `None` is the normal "no deterministic parse" branch, not an error.
pub fn parse_filename(filename: &str) -> Option<GrammarParse> {
    let (stem, _) = split_extension(filename);

    let mut head = stem.splitn(3, DELIMITER);
    let item_code = head.next()?;
    let brand = head.next()?;
    let rest = head.next()?;

    let mut tail = rest.rsplitn(3, DELIMITER);
    let colours = tail.next()?;
    let dimensions = tail.next()?;
    let product_variant = tail.next()?;

    let fields: Fields = [item_code, brand, product_variant, dimensions, colours].map(String::from);
    if !is_complete(&fields) {
        return None;
    }

    Some(GrammarParse {
        fields,
        notes: STANDARD_PARSE_NOTE.to_string(),
    })
}
