pub mod choice;
pub mod outcome;
pub mod resource;
pub mod spec;

pub use choice::ChoiceType;
pub use outcome::{CheckReport, OutcomeKind, ValidationOutcome};
pub use resource::{ParsedResource, ReferenceTarget, ResourceCollection};
pub use spec::{
    Binding, BindingStrength, CompositeComponent, Discriminator, FixedValue, MustSupportElement,
    MustSupportSpec, ProfileSpec, SearchParamType, SearchParameterSpec, SliceDefinition,
};
