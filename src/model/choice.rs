use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

macro_rules! choice_types {
    ($($variant:ident => $suffix:literal),+ $(,)?) => {
        /// Concrete datatype carried by a populated choice element (`value[x]`,
        /// `effective[x]`, `onset[x]`, ...).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ChoiceType {
            $($variant),+
        }

        impl ChoiceType {
            pub const ALL: &'static [ChoiceType] = &[$(ChoiceType::$variant),+];

            /// Suffix used in the JSON property name, e.g. `Quantity` in `valueQuantity`.
            pub fn suffix(&self) -> &'static str {
                match self {
                    $(ChoiceType::$variant => $suffix),+
                }
            }
        }
    };
}

choice_types! {
    Base64Binary => "Base64Binary",
    Boolean => "Boolean",
    Canonical => "Canonical",
    Code => "Code",
    Date => "Date",
    DateTime => "DateTime",
    Decimal => "Decimal",
    Id => "Id",
    Instant => "Instant",
    Integer => "Integer",
    Markdown => "Markdown",
    Oid => "Oid",
    PositiveInt => "PositiveInt",
    String => "String",
    Time => "Time",
    UnsignedInt => "UnsignedInt",
    Uri => "Uri",
    Url => "Url",
    Uuid => "Uuid",
    Address => "Address",
    Age => "Age",
    Annotation => "Annotation",
    Attachment => "Attachment",
    CodeableConcept => "CodeableConcept",
    Coding => "Coding",
    ContactPoint => "ContactPoint",
    Count => "Count",
    Distance => "Distance",
    Duration => "Duration",
    HumanName => "HumanName",
    Identifier => "Identifier",
    Money => "Money",
    Period => "Period",
    Quantity => "Quantity",
    Range => "Range",
    Ratio => "Ratio",
    Reference => "Reference",
    SampledData => "SampledData",
    Signature => "Signature",
    Timing => "Timing",
    Dosage => "Dosage",
    Meta => "Meta",
}

impl ChoiceType {
    /// Parse a FHIR type code (`Quantity`, `dateTime`, `string`) into a choice variant.
    pub fn from_type_code(code: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.suffix().eq_ignore_ascii_case(code))
    }

    /// FHIR type code as it appears in StructureDefinitions (`dateTime`, `Quantity`).
    pub fn type_code(&self) -> String {
        let suffix = self.suffix();
        if self.is_primitive() {
            let mut chars = suffix.chars();
            match chars.next() {
                Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        } else {
            suffix.to_string()
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ChoiceType::Base64Binary
                | ChoiceType::Boolean
                | ChoiceType::Canonical
                | ChoiceType::Code
                | ChoiceType::Date
                | ChoiceType::DateTime
                | ChoiceType::Decimal
                | ChoiceType::Id
                | ChoiceType::Instant
                | ChoiceType::Integer
                | ChoiceType::Markdown
                | ChoiceType::Oid
                | ChoiceType::PositiveInt
                | ChoiceType::String
                | ChoiceType::Time
                | ChoiceType::UnsignedInt
                | ChoiceType::Uri
                | ChoiceType::Url
                | ChoiceType::Uuid
        )
    }

    /// Find the populated variant of a choice head inside `object`.
    ///
    /// At most one variant may be populated in a conformant resource; the first
    /// one found in declaration order wins.
    pub fn populated<'a>(
        object: &'a Map<String, Value>,
        head: &str,
    ) -> Option<(Self, &'a str, &'a Value)> {
        Self::ALL.iter().find_map(|choice| {
            let key = format!("{head}{}", choice.suffix());
            object
                .get_key_value(&key)
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (*choice, key.as_str(), value))
        })
    }
}

impl fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_code())
    }
}
