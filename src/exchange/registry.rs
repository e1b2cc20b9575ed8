use super::{binance::BinanceClass, kraken::KrakenClass, ExchangeClass};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps exchange identifiers to their classes.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    classes: BTreeMap<String, Arc<dyn ExchangeClass>>,
}

impl ExchangeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every venue this crate ships.
    pub fn builtin() -> Self {
        Self::empty()
            .with(Arc::new(BinanceClass))
            .with(Arc::new(KrakenClass))
    }

    pub fn with(mut self, class: Arc<dyn ExchangeClass>) -> Self {
        self.register(class);
        self
    }

    pub fn register(&mut self, class: Arc<dyn ExchangeClass>) {
        self.classes.insert(class.id().to_string(), class);
    }

    /// Identifiers are matched exactly.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ExchangeClass>> {
        self.classes.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}
