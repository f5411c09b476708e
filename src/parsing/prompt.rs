use crate::cache::ExampleEntry;
use crate::grammar::Fields;

const PARSE_DIRECTIVE: &str = "You are a file naming expert for print/packaging specs. \
Given a filename, parse these 5 fields, treating underscores only as delimiters: \
[Item Code, Brand, Product+Variant, Dimensions, No. of Colours].\n\
Product+Variant may contain underscores inside, do not split further. \
Hyphens and numbers can appear anywhere. Always explain edge cases or corrections in notes.";

const EXPLAIN_DIRECTIVE: &str = "You are a filename parser for packaging spec files. \
Every filename is always in the format: \
ItemCode_Brand_Product+Variant_Dimensions_NoOfColours.ext - always 5 parts, underscores as delimiters. \
Product+Variant may have internal underscores. Do NOT split Product+Variant further.";

const REPLY_FORMAT: &str = "Return as JSON: {\"parsed\": [..fields..], \"notes\": \"...\"}";

const NO_EXAMPLES: &str = "No prior examples available.";

/// Hand-confirmed parses that always accompany a query explanation.
pub fn seed_examples() -> Vec<ExampleEntry> {
    let seed = |filename: &str, fields: [&str; 5], notes: &str| {
        ExampleEntry::new(filename, fields.map(String::from), notes)
    };

    vec![
        seed(
            "3103159_Dettol_Soap_Cool_Menthol_96X135MM_9COL.pdf",
            ["3103159", "Dettol", "Soap_Cool_Menthol", "96X135MM", "9COL"],
            "Standard Dettol soap spec. Product+Variant combined: Soap_Cool_Menthol.",
        ),
        seed(
            "ITM-GER-004_Germol_Soap_Lemon_174X95MM_5COL.png",
            ["ITM-GER-004", "Germol", "Soap_Lemon", "174X95MM", "5COL"],
            "Non-numeric code example. Product+Variant is Soap_Lemon.",
        ),
        seed(
            "20042586_Godrej_Soap_LimeAloeVera_126X169MM_8COL.pdf",
            ["20042586", "Godrej", "Soap_LimeAloeVera", "126X169MM", "8COL"],
            "Godrej LimeAloeVera, 8 colors. Product+Variant combined: Soap_LimeAloeVera.",
        ),
    ]
}

fn render_fields(fields: &Fields) -> String {
    let quoted: Vec<String> = fields.iter().map(|field| format!("{field:?}")).collect();
    format!("[{}]", quoted.join(", "))
}

/// `filename => ["a", "b", ...] (Note: ...)`, one line per example.
pub fn render_examples(examples: &[ExampleEntry]) -> String {
    if examples.is_empty() {
        return NO_EXAMPLES.to_string();
    }

    examples
        .iter()
        .map(|example| {
            format!(
                "{} => {} (Note: {})",
                example.filename,
                render_fields(&example.fields),
                example.notes
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking the model to split one filename.
pub fn build_parse_prompt(filename: &str, examples: &[ExampleEntry]) -> String {
    format!(
        "{PARSE_DIRECTIVE}\nHere are some parsed filenames with notes:\n{examples}\nNow parse: {filename}\n{REPLY_FORMAT}",
        examples = render_examples(examples),
    )
}

/// System prompt for free-text questions the keyword filter could not answer.
pub fn build_explain_system_prompt(recent: &[ExampleEntry]) -> String {
    let mut examples = recent.to_vec();
    examples.extend(seed_examples());

    format!(
        "{EXPLAIN_DIRECTIVE} Here are examples:\n{examples}\n\
Given a new filename, split it into the 5 parts as shown. {REPLY_FORMAT}",
        examples = render_examples(&examples),
    )
}
