use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{PrefrankError, Result, ValidationError};

const AGGREGATIONS: [&str; 2] = ["max", "sum"];
const ALIGNMENTS: [&str; 3] = ["max", "mean", "top_k_mean"];
const POLICIES: [&str; 4] = ["none", "mmr", "clustered", "clustered_mmr"];
const STRATEGIES: [&str; 3] = ["auto", "coverage_risk", "lexical"];
const SORT_FIELDS: [&str; 5] = ["price", "mileage", "year", "distance", "id"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_selection(config, &mut errors);
        Self::validate_diversity(config, &mut errors);
        Self::validate_ranking(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PrefrankError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.database_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.search.candidate_pool_size == 0 {
            errors.push(ValidationError::new(
                "search.candidate_pool_size",
                "Candidate pool size must be greater than 0",
            ));
        }

        let radius = config.search.default_radius_miles;
        if !radius.is_finite() || radius <= 0.0 {
            errors.push(ValidationError::new(
                "search.default_radius_miles",
                format!("Radius must be a positive number of miles, got {}", radius),
            ));
        }

        let sort = config.search.default_sort.to_ascii_lowercase();
        let (field, direction) = match sort.split_once(':') {
            Some((field, direction)) => (field.to_string(), Some(direction.to_string())),
            None => (sort.clone(), None),
        };
        if !SORT_FIELDS.contains(&field.trim()) {
            errors.push(ValidationError::new(
                "search.default_sort",
                format!("Sort field must be one of {:?}, got '{}'", SORT_FIELDS, field),
            ));
        }
        if let Some(direction) = direction {
            if !matches!(direction.trim(), "asc" | "desc") {
                errors.push(ValidationError::new(
                    "search.default_sort",
                    format!("Sort direction must be 'asc' or 'desc', got '{}'", direction),
                ));
            }
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_selection(config: &Config, errors: &mut Vec<ValidationError>) {
        let min_sim = config.selection.min_similarity;
        if !(-1.0..=1.0).contains(&min_sim) {
            errors.push(ValidationError::new(
                "selection.min_similarity",
                format!("Similarity threshold must be between -1.0 and 1.0, got {}", min_sim),
            ));
        }

        let risk = config.selection.risk_aversion;
        if !(0.0..=1.0).contains(&risk) {
            errors.push(ValidationError::new(
                "selection.risk_aversion",
                format!("Risk aversion must be between 0.0 and 1.0, got {}", risk),
            ));
        }

        let aggregation = normalized(&config.selection.aggregation);
        if !AGGREGATIONS.contains(&aggregation.as_str()) {
            errors.push(ValidationError::new(
                "selection.aggregation",
                format!("Aggregation must be one of {:?}, got '{}'", AGGREGATIONS, aggregation),
            ));
        }

        let alignment = normalized(&config.selection.alignment);
        if !ALIGNMENTS.contains(&alignment.as_str()) {
            errors.push(ValidationError::new(
                "selection.alignment",
                format!("Alignment must be one of {:?}, got '{}'", ALIGNMENTS, alignment),
            ));
        }

        if alignment == "top_k_mean" && config.selection.alignment_top_k == 0 {
            errors.push(ValidationError::new(
                "selection.alignment_top_k",
                "Top-k must be greater than 0",
            ));
        }
    }

    fn validate_diversity(config: &Config, errors: &mut Vec<ValidationError>) {
        let policy = normalized(&config.diversity.policy);
        if !POLICIES.contains(&policy.as_str()) {
            errors.push(ValidationError::new(
                "diversity.policy",
                format!("Policy must be one of {:?}, got '{}'", POLICIES, policy),
            ));
        }

        let lambda = config.diversity.mmr_lambda;
        if !(0.0..=1.0).contains(&lambda) {
            errors.push(ValidationError::new(
                "diversity.mmr_lambda",
                format!("MMR lambda must be between 0.0 and 1.0, got {}", lambda),
            ));
        }

        if config.diversity.cluster_size == 0 {
            errors.push(ValidationError::new(
                "diversity.cluster_size",
                "Cluster size must be greater than 0",
            ));
        }
    }

    fn validate_ranking(config: &Config, errors: &mut Vec<ValidationError>) {
        let strategy = normalized(&config.ranking.strategy);
        if !STRATEGIES.contains(&strategy.as_str()) {
            errors.push(ValidationError::new(
                "ranking.strategy",
                format!("Strategy must be one of {:?}, got '{}'", STRATEGIES, strategy),
            ));
        }
    }
}

/// Enum-like settings are read case-insensitively with surrounding blanks ignored
fn normalized(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::EngineSettings;

    fn error_paths(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Err(PrefrankError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_lambda_out_of_range() {
        let mut config = Config::default();
        config.diversity.mmr_lambda = 1.5;
        assert_eq!(error_paths(&config), vec!["diversity.mmr_lambda"]);
    }

    #[test]
    fn test_unknown_strategy() {
        let mut config = Config::default();
        config.ranking.strategy = "neural".to_string();
        assert_eq!(error_paths(&config), vec!["ranking.strategy"]);
    }

    #[test]
    fn test_enum_values_accept_any_case() {
        let mut config = Config::default();
        config.diversity.policy = "Clustered_MMR".to_string();
        config.selection.aggregation = "SUM".to_string();
        config.selection.alignment = " Top_K_Mean ".to_string();
        config.ranking.strategy = "Lexical".to_string();

        assert!(ConfigValidator::validate(&config).is_ok());
        // Everything the validator accepts must also build engine settings
        assert!(EngineSettings::from_config(&config).is_ok());
    }

    #[test]
    fn test_top_k_checked_for_mixed_case_alignment() {
        let mut config = Config::default();
        config.selection.alignment = "TOP_K_MEAN".to_string();
        config.selection.alignment_top_k = 0;
        assert_eq!(error_paths(&config), vec!["selection.alignment_top_k"]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.selection.min_similarity = 2.0;
        config.selection.aggregation = "median".to_string();
        config.diversity.cluster_size = 0;
        config.search.default_sort = "color:up".to_string();

        let paths = error_paths(&config);
        assert!(paths.contains(&"selection.min_similarity".to_string()));
        assert!(paths.contains(&"selection.aggregation".to_string()));
        assert!(paths.contains(&"diversity.cluster_size".to_string()));
        assert_eq!(
            paths.iter().filter(|p| *p == "search.default_sort").count(),
            2
        );
    }
}
