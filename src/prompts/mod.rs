//! MCP prompt templates
//!
//! Prompts are rendered locally and never touch the backend. They steer the
//! agent towards the tools and resources this server exposes.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Entry in `prompts/list`
#[derive(Debug, Clone, Serialize)]
pub struct PromptDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static [PromptArgument],
}

/// Rendered prompt, ready for `prompts/get`
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub description: String,
    pub text: String,
}

impl RenderedPrompt {
    pub fn to_json(&self) -> Value {
        json!({
            "description": self.description,
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": self.text}
            }]
        })
    }
}

const fn required(name: &'static str, description: &'static str) -> PromptArgument {
    PromptArgument {
        name,
        description,
        required: true,
    }
}

pub const PROMPTS: &[PromptDefinition] = &[
    PromptDefinition {
        name: "patient_summary",
        description: "Generate a clinical summary for a patient",
        arguments: &[required("patient_id", "The Patient resource ID")],
    },
    PromptDefinition {
        name: "cohort_query",
        description: "Help build a query to find a cohort of patients",
        arguments: &[required("criteria", "Description of the patient criteria")],
    },
    PromptDefinition {
        name: "analyze_measure",
        description: "Analyze and explain a MeasureReport result",
        arguments: &[required("measure_id", "The Measure resource ID")],
    },
    PromptDefinition {
        name: "fhir_query_help",
        description: "Help construct a FHIR search query",
        arguments: &[
            required("resource_type", "The FHIR resource type to search"),
            required("goal", "What you are trying to find"),
        ],
    },
];

/// Render a prompt by name
pub fn render(name: &str, arguments: Option<&Map<String, Value>>) -> Result<RenderedPrompt> {
    let definition = PROMPTS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::UnknownOperation(name.to_string()))?;

    let empty = Map::new();
    let arguments = arguments.unwrap_or(&empty);
    let arg = |key: &str| argument(name, arguments, key);

    let rendered = match definition.name {
        "patient_summary" => {
            let patient_id = arg("patient_id")?;
            RenderedPrompt {
                description: format!("Generate clinical summary for patient {patient_id}"),
                text: format!(
                    "Please generate a clinical summary for patient {patient_id}.\n\
                     \n\
                     Retrieve the patient's record with the patient_everything tool, then summarize:\n\
                     \n\
                     1. **Demographics**: name, age, gender, contact details\n\
                     2. **Active Conditions**: current diagnoses and problems\n\
                     3. **Medications**: current prescriptions and dosages\n\
                     4. **Recent Encounters**: the latest visits and why they happened\n\
                     5. **Key Observations**: notable vital signs and lab results\n\
                     6. **Allergies**: known allergies and intolerances\n\
                     7. **Care Team**: involved practitioners and organizations\n\
                     \n\
                     Keep it concise and suitable for clinical review."
                ),
            }
        }
        "cohort_query" => {
            let criteria = arg("criteria")?;
            RenderedPrompt {
                description: format!("Build query for: {criteria}"),
                text: format!(
                    "Help me build a FHIR search to find patients matching these criteria:\n\
                     \n\
                     {criteria}\n\
                     \n\
                     Please:\n\
                     1. Identify the FHIR resource types involved\n\
                     2. Choose the search parameters, including chained or _has parameters where useful\n\
                     3. Build the query step by step\n\
                     4. Run it with the search_resources tool\n\
                     5. Summarize the matching cohort\n\
                     \n\
                     If the criteria need logic that FHIR search cannot express, explain what a CQL measure would need."
                ),
            }
        }
        "analyze_measure" => {
            let measure_id = arg("measure_id")?;
            RenderedPrompt {
                description: format!("Analyze measure {measure_id}"),
                text: format!(
                    "Please analyze the quality measure {measure_id}.\n\
                     \n\
                     1. Fetch the Measure definition with read_resource (resource_type Measure)\n\
                     2. Explain what the measure evaluates\n\
                     3. Run it with evaluate_measure; ask for the measurement period if it is unknown\n\
                     4. Interpret the MeasureReport:\n\
                     \x20  - population counts (initial population, denominator, numerator, exclusions)\n\
                     \x20  - the resulting rates\n\
                     \x20  - what the numbers mean clinically\n\
                     5. Point out areas for improvement where the results suggest any"
                ),
            }
        }
        _ => {
            let resource_type = arg("resource_type")?;
            let goal = arg("goal")?;
            RenderedPrompt {
                description: format!("Help build {resource_type} query"),
                text: format!(
                    "Help me construct a FHIR search query for {resource_type} resources.\n\
                     \n\
                     Goal: {goal}\n\
                     \n\
                     Please:\n\
                     1. Read the blaze://capabilities resource to see which search parameters {resource_type} supports\n\
                     2. Recommend the parameters to use and any modifiers (:exact, :missing, ...)\n\
                     3. Explain the syntax of each one\n\
                     4. Build and run the query with search_resources\n\
                     5. Show the results and how the query could be refined"
                ),
            }
        }
    };
    Ok(rendered)
}

/// Required string argument; numbers are accepted and rendered as text
fn argument(prompt: &str, arguments: &Map<String, Value>, key: &str) -> Result<String> {
    let value = match arguments.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(_) => {
            return Err(Error::invalid_arguments(
                prompt,
                format!("'{key}' must be a string"),
            ));
        }
    };
    if value.is_empty() {
        return Err(Error::invalid_arguments(
            prompt,
            format!("missing required argument '{key}'"),
        ));
    }
    Ok(value)
}
