// Tiered constraint model and relaxation
//
// Constraints carry a tier (Inferred < Regular < MustHave). The relaxation
// controller widens a FilterSet tier by tier until the candidate store returns rows.

mod relaxation;
mod types;

pub use relaxation::{
    RelaxationController, RelaxationOutcome, RelaxationPolicy, RelaxationReport, RelaxationStep,
    RelaxedFilter,
};
pub use types::{Constraint, FilterSet, FilterValue, Tier};
