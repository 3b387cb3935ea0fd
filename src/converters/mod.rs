// Converters module - format conversion between the two wire dialects
//
// - anthropic_to_kiro: Anthropic Messages request → CodeWhisperer request
// - kiro_to_anthropic: decoded CodeWhisperer events → Anthropic response (batch)

pub mod anthropic_to_kiro;
pub mod kiro_to_anthropic;
