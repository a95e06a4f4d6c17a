use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Cents, InvoiceItem};

/// Bump whenever the priority order or the default keyword table changes.
pub const KEYWORD_RULES_VERSION: u32 = 1;

/// Cash-register bucket an invoice line is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaisseType {
    /// Labor profit
    #[serde(rename = "beneficeMO")]
    BeneficeMo,
    #[serde(rename = "charge")]
    Charge,
    /// Parts purchase and resale
    #[serde(rename = "achatPiece")]
    AchatPiece,
    #[serde(rename = "huile")]
    Huile,
    /// VAT, and the fallback for unmatched items
    #[serde(rename = "tva")]
    Tva,
}

/// Evaluation order of the keyword categories. Ambiguous descriptions go to
/// the earliest category with a matching keyword.
pub const CATEGORY_PRIORITY: [CaisseType; 4] = [
    CaisseType::BeneficeMo,
    CaisseType::Charge,
    CaisseType::AchatPiece,
    CaisseType::Huile,
];

impl CaisseType {
    pub const ALL: [CaisseType; 5] = [
        CaisseType::BeneficeMo,
        CaisseType::Charge,
        CaisseType::AchatPiece,
        CaisseType::Huile,
        CaisseType::Tva,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaisseType::BeneficeMo => "beneficeMO",
            CaisseType::Charge => "charge",
            CaisseType::AchatPiece => "achatPiece",
            CaisseType::Huile => "huile",
            CaisseType::Tva => "tva",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "beneficemo" | "benefice" => Some(CaisseType::BeneficeMo),
            "charge" | "charges" => Some(CaisseType::Charge),
            "achatpiece" | "piece" => Some(CaisseType::AchatPiece),
            "huile" => Some(CaisseType::Huile),
            "tva" => Some(CaisseType::Tva),
            _ => None,
        }
    }

    /// Accounting label carried by the transactions of this caisse.
    pub fn label(&self) -> &'static str {
        match self {
            CaisseType::BeneficeMo => "MAIN_OEUVRE",
            CaisseType::Charge => "CHARGE",
            CaisseType::AchatPiece => "PIECE",
            CaisseType::Huile => "HUILE",
            CaisseType::Tva => "TVA",
        }
    }

    pub fn is_keyword_driven(&self) -> bool {
        !matches!(self, CaisseType::Tva)
    }
}

impl std::fmt::Display for CaisseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered keyword lists for the four keyword-driven categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordSettings {
    #[serde(rename = "beneficeMO")]
    pub benefice_mo: Vec<String>,
    pub charge: Vec<String>,
    pub achat_piece: Vec<String>,
    pub huile: Vec<String>,
}

impl Default for KeywordSettings {
    fn default() -> Self {
        fn list(keywords: &[&str]) -> Vec<String> {
            keywords.iter().map(|k| k.to_string()).collect()
        }

        Self {
            benefice_mo: list(&[
                "main d'oeuvre",
                "réparation",
                "diagnostic",
                "vidange",
                "révision",
                "entretien",
                "montage",
                "démontage",
                "main-d'œuvre",
                "main d'œuvre",
                "travail",
                "service",
            ]),
            charge: list(&[
                "loyer",
                "électricité",
                "eau",
                "téléphone",
                "assurance",
                "carburant",
                "fourniture bureau",
                "frais bancaire",
                "charge",
                "coût",
                "dépense",
                "frais",
            ]),
            achat_piece: list(&[
                "pièce",
                "filtre",
                "plaquette",
                "disque",
                "amortisseur",
                "courroie",
                "bougie",
                "batterie",
                "pièce détachée",
                "composant",
                "accessoire",
            ]),
            huile: list(&[
                "huile",
                "lubrifiant",
                "5w30",
                "5w40",
                "10w40",
                "synthétique",
                "semi-synthétique",
                "minérale",
                "huile moteur",
                "huile de transmission",
                "graisse",
            ]),
        }
    }
}

impl KeywordSettings {
    /// Keywords of a category; `tva` has none.
    pub fn keywords(&self, category: CaisseType) -> &[String] {
        match category {
            CaisseType::BeneficeMo => &self.benefice_mo,
            CaisseType::Charge => &self.charge,
            CaisseType::AchatPiece => &self.achat_piece,
            CaisseType::Huile => &self.huile,
            CaisseType::Tva => &[],
        }
    }

    fn keywords_mut(&mut self, category: CaisseType) -> Result<&mut Vec<String>, KeywordError> {
        match category {
            CaisseType::BeneficeMo => Ok(&mut self.benefice_mo),
            CaisseType::Charge => Ok(&mut self.charge),
            CaisseType::AchatPiece => Ok(&mut self.achat_piece),
            CaisseType::Huile => Ok(&mut self.huile),
            CaisseType::Tva => Err(KeywordError::NotKeywordDriven(category)),
        }
    }

    /// Append a keyword at the lowest priority of its category.
    pub fn add_keyword(&mut self, category: CaisseType, keyword: &str) -> Result<(), KeywordError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(KeywordError::Blank(category));
        }
        let list = self.keywords_mut(category)?;
        if list.iter().any(|k| k.to_lowercase() == keyword.to_lowercase()) {
            return Err(KeywordError::Duplicate {
                category,
                keyword: keyword.to_string(),
            });
        }
        list.push(keyword.to_string());
        Ok(())
    }

    /// Remove a keyword (case-insensitive). Returns false if it was absent.
    pub fn remove_keyword(&mut self, category: CaisseType, keyword: &str) -> Result<bool, KeywordError> {
        let needle = keyword.trim().to_lowercase();
        let list = self.keywords_mut(category)?;
        let before = list.len();
        list.retain(|k| k.to_lowercase() != needle);
        Ok(list.len() != before)
    }

    pub fn validate(&self) -> Result<(), KeywordError> {
        for category in CATEGORY_PRIORITY {
            let mut seen: Vec<String> = Vec::new();
            for keyword in self.keywords(category) {
                let normalized = keyword.trim().to_lowercase();
                if normalized.is_empty() {
                    return Err(KeywordError::Blank(category));
                }
                if seen.contains(&normalized) {
                    return Err(KeywordError::Duplicate {
                        category,
                        keyword: keyword.clone(),
                    });
                }
                seen.push(normalized);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordError {
    Blank(CaisseType),
    Duplicate { category: CaisseType, keyword: String },
    NotKeywordDriven(CaisseType),
}

impl std::fmt::Display for KeywordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeywordError::Blank(category) => write!(f, "blank keyword in category {}", category),
            KeywordError::Duplicate { category, keyword } => {
                write!(f, "keyword '{}' appears twice in category {}", keyword, category)
            }
            KeywordError::NotKeywordDriven(category) => {
                write!(f, "category {} does not take keywords", category)
            }
        }
    }
}

impl std::error::Error for KeywordError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: CaisseType,
    pub matched_keyword: Option<String>,
}

/// Classify a description. Total: anything unmatched lands in `tva`.
pub fn categorize(description: &str, settings: &KeywordSettings) -> Categorization {
    let normalized = description.trim().to_lowercase();

    for category in CATEGORY_PRIORITY {
        for keyword in settings.keywords(category) {
            let needle = keyword.trim().to_lowercase();
            if !needle.is_empty() && normalized.contains(&needle) {
                return Categorization {
                    category,
                    matched_keyword: Some(keyword.clone()),
                };
            }
        }
    }

    Categorization {
        category: CaisseType::Tva,
        matched_keyword: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedItem {
    pub item: InvoiceItem,
    pub category: CaisseType,
    pub matched_keyword: Option<String>,
}

pub fn categorize_items(items: &[InvoiceItem], settings: &KeywordSettings) -> Vec<CategorizedItem> {
    items
        .iter()
        .map(|item| {
            let Categorization {
                category,
                matched_keyword,
            } = categorize(&item.description, settings);
            CategorizedItem {
                item: item.clone(),
                category,
                matched_keyword,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub count: usize,
    pub total_amount: Cents,
    pub total_achat: Cents,
    pub total_vente: Cents,
}

/// Per-category count and amounts over classified items.
pub fn summarize_items(items: &[CategorizedItem]) -> BTreeMap<CaisseType, CategoryTotals> {
    let mut summary: BTreeMap<CaisseType, CategoryTotals> = CaisseType::ALL
        .iter()
        .map(|c| (*c, CategoryTotals::default()))
        .collect();

    for categorized in items {
        let totals = summary.entry(categorized.category).or_default();
        totals.count += 1;
        totals.total_amount += categorized.item.total;
        totals.total_achat += categorized.item.achat_piece;
        totals.total_vente += categorized.item.vente_piece;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_resolves_ambiguity() {
        let settings = KeywordSettings::default();
        // "vidange" (beneficeMO) beats "huile", "huile moteur" and "5w30"
        let result = categorize("vidange huile moteur 5w30", &settings);
        assert_eq!(result.category, CaisseType::BeneficeMo);
        assert_eq!(result.matched_keyword.as_deref(), Some("vidange"));
    }

    #[test]
    fn test_unmatched_falls_back_to_tva() {
        let settings = KeywordSettings::default();
        let result = categorize("texte sans mot-clé", &settings);
        assert_eq!(result.category, CaisseType::Tva);
        assert_eq!(result.matched_keyword, None);
    }

    #[test]
    fn test_first_keyword_in_list_order_wins() {
        let settings = KeywordSettings::default();
        // Both "huile" and "huile moteur" match, "huile" comes first
        let result = categorize("Bidon huile moteur", &settings);
        assert_eq!(result.category, CaisseType::Huile);
        assert_eq!(result.matched_keyword.as_deref(), Some("huile"));
    }

    #[test]
    fn test_normalization_is_case_insensitive_and_trimmed() {
        let settings = KeywordSettings::default();
        let result = categorize("   PLAQUETTES DE FREIN AVANT  ", &settings);
        assert_eq!(result.category, CaisseType::AchatPiece);
        assert_eq!(result.matched_keyword.as_deref(), Some("plaquette"));

        let accented = categorize("RÉPARATION embrayage", &settings);
        assert_eq!(accented.category, CaisseType::BeneficeMo);
        assert_eq!(accented.matched_keyword.as_deref(), Some("réparation"));
    }

    #[test]
    fn test_charge_beats_parts() {
        let settings = KeywordSettings::default();
        // "frais" (charge) outranks "pièce" (achatPiece)
        let result = categorize("frais de port pièce", &settings);
        assert_eq!(result.category, CaisseType::Charge);
        assert_eq!(result.matched_keyword.as_deref(), Some("frais"));
    }

    #[test]
    fn test_custom_keywords() {
        let mut settings = KeywordSettings::default();
        settings.add_keyword(CaisseType::Huile, "Total Quartz").unwrap();
        let result = categorize("bidon total quartz 4L", &settings);
        assert_eq!(result.category, CaisseType::Huile);
        assert_eq!(result.matched_keyword.as_deref(), Some("Total Quartz"));

        assert!(settings.remove_keyword(CaisseType::Huile, "total quartz").unwrap());
        assert_eq!(categorize("bidon total quartz 4L", &settings).category, CaisseType::Tva);
    }

    #[test]
    fn test_keyword_configuration_errors() {
        let mut settings = KeywordSettings::default();
        assert_eq!(
            settings.add_keyword(CaisseType::Charge, "   "),
            Err(KeywordError::Blank(CaisseType::Charge))
        );
        assert!(matches!(
            settings.add_keyword(CaisseType::Charge, "LOYER"),
            Err(KeywordError::Duplicate { .. })
        ));
        assert_eq!(
            settings.add_keyword(CaisseType::Tva, "tva"),
            Err(KeywordError::NotKeywordDriven(CaisseType::Tva))
        );

        settings.huile.push(String::new());
        assert_eq!(settings.validate(), Err(KeywordError::Blank(CaisseType::Huile)));
        assert!(KeywordSettings::default().validate().is_ok());
    }

    #[test]
    fn test_summarize_items() {
        let settings = KeywordSettings::default();
        let items = vec![
            InvoiceItem::new("Filtre à air", 1.0, 2500).with_achat_piece(1500),
            InvoiceItem::new("Disque de frein", 2.0, 6000).with_achat_piece(4000),
            InvoiceItem::new("Lavage", 1.0, 1000),
        ];
        let summary = summarize_items(&categorize_items(&items, &settings));

        let parts = summary[&CaisseType::AchatPiece];
        assert_eq!(parts.count, 2);
        assert_eq!(parts.total_amount, 2500 + 12000);
        assert_eq!(parts.total_achat, 5500);
        assert_eq!(parts.total_vente, 8500);
        assert_eq!(summary[&CaisseType::Tva].count, 1);
        assert_eq!(summary[&CaisseType::Huile].count, 0);
    }

    #[test]
    fn test_caisse_type_parsing() {
        for caisse in CaisseType::ALL {
            assert_eq!(CaisseType::from_str(caisse.as_str()), Some(caisse));
        }
        assert_eq!(CaisseType::from_str("achat-piece"), Some(CaisseType::AchatPiece));
        assert_eq!(CaisseType::from_str("benefice_mo"), Some(CaisseType::BeneficeMo));
        assert_eq!(CaisseType::from_str("stock"), None);
    }
}
