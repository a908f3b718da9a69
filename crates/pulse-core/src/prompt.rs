//! Grounding prompt construction.

/// Build the single prompt sent to the generative model.
///
/// `context` is the ranked, newline-joined document texts; links to
/// issues are rendered as `<citation_base_url>/browse/<KEY>`.
pub fn build_grounding_prompt(question: &str, context: &str, citation_base_url: &str) -> String {
    let base = citation_base_url.trim_end_matches('/');
    format!(
        "You are a senior project management assistant for an engineering organization.\n\
         Your goals are to track delivery status, surface risks and blockers early, \
         and recommend concrete next steps.\n\
         \n\
         Answer the question using ONLY the records in the context below. \
         If the context does not contain the answer, say so plainly.\n\
         \n\
         Structure your answer with these sections:\n\
         *Summary*: a short overview of the current status.\n\
         *Risks/Blockers*: anything blocked, overdue, unassigned or at risk.\n\
         *Recommended Actions*: specific next steps and who should take them.\n\
         *Linked Tickets*: every issue you referred to.\n\
         \n\
         Whenever you mention an issue key, hyperlink it as <{base}/browse/KEY|KEY>, \
         for example <{base}/browse/ABC-123|ABC-123>. \
         Pull requests and wiki pages may be linked with the URL given in their record.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n",
        base = base,
        context = context,
        question = question,
    )
}
