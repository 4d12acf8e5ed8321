use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use std::sync::LazyLock;
use unic_langid::LanguageIdentifier;

/// Language used when a requested one has no catalogue
pub const DEFAULT_LANGUAGE: &str = "uz";

const CATALOGUES: [(&str, &str); 2] = [
    ("uz", include_str!("../locales/uz/main.ftl")),
    ("en", include_str!("../locales/en/main.ftl")),
];

/// Localization manager holding one Fluent bundle per supported language
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a manager with every embedded catalogue loaded
    pub fn new() -> Self {
        let mut bundles = HashMap::new();

        for (lang, source) in CATALOGUES {
            match Self::create_bundle(lang, source) {
                Ok(bundle) => {
                    bundles.insert(lang.to_string(), bundle);
                }
                Err(e) => tracing::error!(lang, error = %e, "Failed to load message catalogue"),
            }
        }

        Self { bundles }
    }

    fn create_bundle(lang: &str, source: &str) -> anyhow::Result<FluentBundle<FluentResource>> {
        let locale: LanguageIdentifier = lang.parse()?;
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        // Plain chat text, no bidi isolation marks around arguments
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow::anyhow!("{} syntax errors in {lang} catalogue", errors.len()))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow::anyhow!("{} duplicate keys in {lang} catalogue", errors.len()))?;

        Ok(bundle)
    }

    fn bundle_for(&self, language_code: Option<&str>) -> Option<&FluentBundle<FluentResource>> {
        language_code
            .and_then(|code| self.bundles.get(code))
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
    }

    /// Get a localized message
    pub fn get_message(
        &self,
        key: &str,
        args: Option<&[(&str, &str)]>,
        language_code: Option<&str>,
    ) -> String {
        let Some(bundle) = self.bundle_for(language_code) else {
            return format!("Missing translation: {key}");
        };

        let Some(pattern) = bundle.get_message(key).and_then(|msg| msg.value()) else {
            return format!("Missing translation: {key}");
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            fluent_args
        });

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            tracing::warn!(key, ?errors, "Errors while formatting message");
        }
        value.into_owned()
    }

    pub fn has_language(&self, language_code: &str) -> bool {
        self.bundles.contains_key(language_code)
    }
}

impl Default for LocalizationManager {
    fn default() -> Self {
        Self::new()
    }
}

static LOCALIZATION_MANAGER: LazyLock<LocalizationManager> =
    LazyLock::new(LocalizationManager::new);

/// Get the global localization manager
pub fn get_localization_manager() -> &'static LocalizationManager {
    &LOCALIZATION_MANAGER
}

/// Localized message in the given language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    get_localization_manager().get_message(key, None, language_code)
}

/// Localized message with arguments in the given language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    get_localization_manager().get_message(key, Some(args), language_code)
}
