use super::{
    AnalysisStage, AnalysisUnavailable, IdentificationResult, IdentifyRequest, ItemIdentifier,
    UnavailableReason,
};
use crate::llm::{LlmClient, LlmMessage, parse_json_reply};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You identify second-hand items from marketplace listings. \
Reply with a single JSON object with keys brand, model, variant, condition, category, \
worth_investigating (bool) and search_query (a short query that finds the same item on eBay). \
Use null for unknown fields. Set worth_investigating to false for generic, unbranded or \
low-value items.";

pub struct LlmIdentifier {
    llm: Arc<LlmClient>,
}

impl LlmIdentifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

/// The model may answer `{"identified": false}` or `null` for unknown items.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentifyReply {
    Unknown(Option<Declined>),
    Found(IdentificationResult),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Declined {
    identified: bool,
}

pub(crate) fn prompt(request: &IdentifyRequest<'_>) -> String {
    let description: String = request.description.chars().take(1500).collect();
    format!(
        "Title: {}\nDescription: {}\nAsking price: ${:.2}\nDetected category: {}",
        request.title, description, request.asking_price, request.detected_category
    )
}

pub(crate) fn parse_reply(text: &str) -> Result<Option<IdentificationResult>, AnalysisUnavailable> {
    let reply: IdentifyReply = parse_json_reply(text)
        .map_err(|err| AnalysisUnavailable::from_llm(AnalysisStage::Identify, &err))?;
    match reply {
        IdentifyReply::Found(result) => Ok(Some(result)),
        IdentifyReply::Unknown(None) => Ok(None),
        IdentifyReply::Unknown(Some(Declined { identified: false })) => Ok(None),
        IdentifyReply::Unknown(Some(Declined { identified: true })) => Err(AnalysisUnavailable::new(
            AnalysisStage::Identify,
            UnavailableReason::InvalidResponse,
            "identified without item details",
        )),
    }
}

#[async_trait]
impl ItemIdentifier for LlmIdentifier {
    async fn identify(
        &self,
        request: &IdentifyRequest<'_>,
    ) -> Result<Option<IdentificationResult>, AnalysisUnavailable> {
        let function = self.llm.config().identify_function.clone();
        let messages = [LlmMessage::system(SYSTEM_PROMPT), LlmMessage::user(prompt(request))];
        let response = self
            .llm
            .chat(&function, &messages)
            .await
            .map_err(|err| AnalysisUnavailable::from_llm(AnalysisStage::Identify, &err))?;
        if let Some(usage) = response.usage {
            debug!(
                target = "flipscout.analysis",
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "identify_usage"
            );
        }
        parse_reply(&response.text)
    }
}
