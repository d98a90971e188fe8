//! Variant option matching.
//!
//! Variants carry positional option parts (`["navy", "xl"]`); products may
//! carry positional labels (`["color", "size"]`). This module derives the
//! option groups a picker renders and answers which values remain viable
//! given a partial selection.

use super::{CatalogProduct, CatalogVariant};

/// One selectable option group, in positional order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionGroup {
    /// Position in every variant's `option_parts`.
    pub position: usize,
    /// Display label: the product's variation type at this position, or
    /// `"Option N"` when the product declares none.
    pub label: String,
    /// Distinct values across all variants, in first-seen order.
    pub values: Vec<String>,
}

/// A partial selection: one chosen value per position, `None` where the
/// shopper has not picked yet.
pub type Selection = [Option<String>];

/// Derive the option groups for a product.
///
/// Group count is the longest `option_parts` across variants; values are the
/// union at each position in first-seen order. Products without multi-part
/// variants yield no groups.
#[must_use]
pub fn option_groups(product: &CatalogProduct) -> Vec<OptionGroup> {
    let group_count = product
        .variants
        .iter()
        .map(|v| v.option_parts.len())
        .max()
        .unwrap_or(0);
    (0..group_count)
        .map(|position| {
            let mut values: Vec<String> = Vec::new();
            for variant in &product.variants {
                if let Some(value) = variant.option_parts.get(position)
                    && !values.iter().any(|v| v == value)
                {
                    values.push(value.clone());
                }
            }
            OptionGroup {
                position,
                label: group_label(product, position),
                values,
            }
        })
        .collect()
}

fn group_label(product: &CatalogProduct, position: usize) -> String {
    product
        .variation_types
        .get(position)
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map_or_else(|| format!("Option {}", position + 1), title_case)
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Whether choosing `candidate` at `position` can still lead to a purchasable
/// variant, holding the rest of `selection` fixed.
///
/// True when some available variant carries `candidate` at `position` and
/// matches every other already-chosen position. Pickers grey out values for
/// which this is false.
#[must_use]
pub fn value_is_viable(
    variants: &[CatalogVariant],
    selection: &Selection,
    position: usize,
    candidate: &str,
) -> bool {
    variants.iter().any(|variant| {
        variant.available
            && variant.option_parts.get(position).map(String::as_str) == Some(candidate)
            && matches_except(variant, selection, position)
    })
}

/// Find the variant matching a complete selection exactly.
#[must_use]
pub fn find_by_parts<'a>(
    variants: &'a [CatalogVariant],
    parts: &[String],
) -> Option<&'a CatalogVariant> {
    variants.iter().find(|v| v.option_parts == parts)
}

/// True when the variant agrees with every chosen position other than
/// `skip`.
fn matches_except(variant: &CatalogVariant, selection: &Selection, skip: usize) -> bool {
    selection.iter().enumerate().all(|(position, chosen)| {
        position == skip
            || chosen.as_ref().is_none_or(|value| {
                variant.option_parts.get(position).map(String::as_str) == Some(value.as_str())
            })
    })
}
