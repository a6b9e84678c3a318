//! Classification of exchange reactions and their grouping by metabolite
use indexmap::IndexMap;

/// Exchange metadata for a single reaction
///
/// Records which metabolite the reaction moves across the community boundary,
/// and with what stoichiometric coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeTag {
    /// Bare (unsuffixed) id of the exchanged metabolite
    pub metabolite: String,
    /// Stoichiometric coefficient of the metabolite in the reaction
    pub stoichiometry: f64,
}

/// Groups exchange reactions by the metabolite they exchange
///
/// The grouping key is the bare metabolite id as it appears in the input
/// models, before any species suffixing, so that the same metabolite exchanged
/// by several species lands under one key and can be matched against a medium
/// map.
#[derive(Debug, Clone, Default)]
pub struct ExchangeSet {
    /// Map from bare metabolite id to the ordered reactions exchanging it
    sets: IndexMap<String, Vec<String>>,
    /// Map from merged reaction id to its exchange metadata
    tags: IndexMap<String, ExchangeTag>,
}

impl ExchangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reaction_id` as an exchange of `metabolite` with the given coefficient
    pub fn insert(&mut self, reaction_id: &str, metabolite: &str, stoichiometry: f64) {
        self.sets
            .entry(metabolite.to_string())
            .or_default()
            .push(reaction_id.to_string());
        self.tags.insert(
            reaction_id.to_string(),
            ExchangeTag {
                metabolite: metabolite.to_string(),
                stoichiometry,
            },
        );
    }

    /// Iterate over the exchanged metabolite ids, in first-seen order
    pub fn metabolites(&self) -> impl Iterator<Item = &String> {
        self.sets.keys()
    }

    /// Get the ordered reactions exchanging a metabolite, if any
    pub fn reactions_for(&self, metabolite: &str) -> Option<&[String]> {
        self.sets.get(metabolite).map(|v| v.as_slice())
    }

    /// Get the exchange metadata for a reaction, if it is an exchange
    pub fn tag(&self, reaction_id: &str) -> Option<&ExchangeTag> {
        self.tags.get(reaction_id)
    }

    /// Check whether a reaction was classified as an exchange
    pub fn is_exchange(&self, reaction_id: &str) -> bool {
        self.tags.contains_key(reaction_id)
    }

    /// Number of distinct exchanged metabolites
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
