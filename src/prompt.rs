//! Prompt templates and rendering.
//!
//! Templates are fixed instruction strings with named `{placeholder}` slots.
//! [`render`] is a pure function: it substitutes every placeholder from the
//! supplied bindings in a single pass and rejects any mismatch between the
//! template's placeholders and the bindings, so a drifted template fails
//! loudly instead of producing a malformed prompt.

use crate::error::{PipelineError, Result};
use crate::models::RetrievedChunk;

/// The exact text the answer generator must produce when the supplied
/// context cannot support an answer.
pub const SENTINEL: &str = "I don't know.";

/// Instruction template for the query reformulation stage.
pub const REFORMULATION_TEMPLATE: &str = "\
You are a legal query reformulator for Indian law. Users will ask casual or informal questions.

Your task:
- Reformulate the question into a formal legal query.
- Use correct legal terminology relevant to Indian laws such as IPC, CrPC, Labour Law, Cyber Law, Consumer Protection Act, etc.
- Be specific and precise.
- Do NOT include phrases like \"as per your question\" or explanations - just output the formal legal query.

Examples:
Q: Can my boss reduce my salary randomly?
-> What are the legal provisions under Indian Labour Law regarding unauthorized salary deductions by employers?

Q: What happens if someone hits me?
-> What are the legal consequences under IPC for physical assault in India?

Q: My landlord is harassing me, what can I do?
-> What legal remedies are available under Indian Rent Control Acts and IPC for landlord harassment?

Q: Can I be fired for taking a sick leave?
-> What protections are provided under Indian Labour Law against termination due to medical leave?

Q: Someone is blackmailing me on Instagram!
-> What legal remedies are available under the Information Technology Act, 2000, and IPC for online blackmail and cyber harassment?

Q: My internet provider isn't fixing my connection for days!
-> What legal recourse does a consumer have under the Consumer Protection Act, 2019, for deficiency in internet services?

Q: My employer didn't pay me for 2 months!
-> What are the legal remedies available under the Payment of Wages Act, 1936, and Indian Labour Law for non-payment of salary?

Q: My neighbor built a wall on my land!
-> What legal actions can be taken under Indian property law in case of encroachment by a neighbor?

Q: I bought a phone and it stopped working in 3 days!
-> What rights does a consumer have under the Consumer Protection Act, 2019, for a defective electronic product?

Q: Someone is using my PAN card to take loans!
-> What legal remedies are available under the Information Technology Act and IPC for identity theft and fraudulent financial activity?

Now reformulate:

Original question: {query}

Reformulated legal query:
";

/// Instruction template for the grounded answer stage.
pub const ANSWER_TEMPLATE: &str = "\
You are a highly trained Indian legal expert. You are given the following legal documents which may contain general references to laws.

Your task is to infer, explain, and reason like a lawyer based on legal principles from the context, even if the exact situation is not directly stated.

Always format your answer as follows:
1. Relevant Laws
2. Legal Reasoning
3. Potential Remedies or Actions
4. Conclusion

Use formal legal language. Base everything ONLY on the context provided. If it is absolutely not possible to answer, say exactly: \"I don't know.\"

CONTEXT:
{context}

QUESTION:
{question}
";

/// Substitute `{name}` placeholders from `bindings`.
///
/// Single pass over the template: substituted values are emitted verbatim
/// and never re-scanned. Errors if the template contains a placeholder with
/// no binding, or a binding with no placeholder.
pub fn render(template: &str, bindings: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut used = vec![false; bindings.len()];

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            PipelineError::config("template has an unterminated '{' placeholder")
        })?;
        let name = &after[..end];

        match bindings.iter().position(|(n, _)| *n == name) {
            Some(i) => {
                out.push_str(bindings[i].1);
                used[i] = true;
            }
            None => {
                return Err(PipelineError::config(format!(
                    "template placeholder '{{{}}}' has no binding",
                    name
                )))
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    if let Some(i) = used.iter().position(|u| !u) {
        return Err(PipelineError::config(format!(
            "binding '{}' does not appear in the template",
            bindings[i].0
        )));
    }

    Ok(out)
}

/// Build the reformulation prompt for a raw user question.
pub fn reformulation_prompt(raw_text: &str) -> Result<String> {
    render(REFORMULATION_TEMPLATE, &[("query", raw_text)])
}

/// Build the grounded-answer prompt from assembled context and the
/// reformulated question.
pub fn answer_prompt(context: &str, question: &str) -> Result<String> {
    render(
        ANSWER_TEMPLATE,
        &[("context", context), ("question", question)],
    )
}

/// Assemble retrieved chunks into the context block, in retrieval order,
/// each attributable to its source document.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[source: {}]\n{}", c.source_id, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
