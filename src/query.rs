use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::cache::{ExampleStore, ParseCache, TableRow};
use crate::parsing::QueryExplainer;

const BRANDS: [&str; 3] = ["dettol", "germol", "godrej"];
const VARIANT_KEYWORD: &str = "cool";

lazy_static! {
    static ref DIMENSIONS: Regex = Regex::new(r"(\d+)[xX](\d+)").unwrap();
    static ref COLOUR_EQ: Regex = Regex::new(r"(\d+)col").unwrap();
    static ref COLOUR_ABOVE: Regex = Regex::new(r"above\s+(\d+)").unwrap();
    static ref LEADING_NUMBER: Regex = Regex::new(r"\d+").unwrap();
}

/// Keyword conditions recognised in a query; every present condition must
/// hold. Anything this cannot answer goes to the model instead.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub brands: Vec<&'static str>,
    pub variant: Option<&'static str>,
    /// Normalised as `WXH`.
    pub dimensions: Option<String>,
    pub colours: Option<u64>,
    pub colours_above: Option<u64>,
}

impl QueryFilter {
    pub fn parse(query: &str) -> Self {
        let q = query.to_lowercase();

        let brands = BRANDS.iter().copied().filter(|b| q.contains(b)).collect();
        let variant = q.contains(VARIANT_KEYWORD).then_some(VARIANT_KEYWORD);
        let dimensions = DIMENSIONS
            .captures(&q)
            .map(|caps| format!("{}X{}", &caps[1], &caps[2]));

        let above = if q.contains("col") {
            COLOUR_ABOVE.captures(&q).and_then(|caps| caps.get(1))
        } else {
            None
        };
        let colours_above = above.and_then(|m| m.as_str().parse().ok());

        // "above 8col" is a threshold, so its number is not also an equality.
        let colours = COLOUR_EQ
            .captures_iter(&q)
            .filter_map(|caps| caps.get(1))
            .find(|m| above.map(|a| a.range()) != Some(m.range()))
            .and_then(|m| m.as_str().parse().ok());

        Self {
            brands,
            variant,
            dimensions,
            colours,
            colours_above,
        }
    }

    /// No recognised keyword at all.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, row: &TableRow) -> bool {
        let [_, brand, variant, dimensions, colours] = &row.fields;
        let brand = brand.to_lowercase();
        let variant = variant.to_lowercase();
        let dimensions = dimensions.to_uppercase();
        let colour_count = LEADING_NUMBER
            .find(colours)
            .and_then(|m| m.as_str().parse::<u64>().ok());

        self.brands.iter().all(|b| brand.contains(b))
            && self.variant.map_or(true, |v| variant.contains(v))
            && self
                .dimensions
                .as_ref()
                .map_or(true, |d| dimensions.contains(d.as_str()))
            && self.colours.map_or(true, |n| colour_count == Some(n))
            && self
                .colours_above
                .map_or(true, |n| colour_count.is_some_and(|c| c > n))
    }

    pub fn apply(&self, rows: &[TableRow]) -> Vec<TableRow> {
        rows.iter().filter(|row| self.matches(row)).cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswer {
    Rows(Vec<TableRow>),
    Explanation(String),
    /// The model could not be reached; the message is shown inline.
    Failed(String),
}

/// Answer from the table when a recognised filter yields rows, otherwise ask
/// the model with the two most recent examples as context.
pub async fn answer_query(
    query: &str,
    cache: &ParseCache,
    explainer: &QueryExplainer,
) -> QueryAnswer {
    let filter = QueryFilter::parse(query);
    if !filter.is_empty() {
        let rows = filter.apply(&cache.rows());
        if !rows.is_empty() {
            return QueryAnswer::Rows(rows);
        }
        debug!(?filter, "filter matched nothing; asking the model");
    }

    let recent = cache.examples().recent(ExampleStore::QUERY_CONTEXT);
    match explainer.explain(query, &recent).await {
        Ok(text) => QueryAnswer::Explanation(text),
        Err(err) => QueryAnswer::Failed(format!("{err:#}")),
    }
}
