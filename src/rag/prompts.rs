//! Fixed prompt text of the counseling answer and its rendering helpers

use crate::models::RetrievedPassage;
use crate::models::Role;
use crate::models::Utterance;

/// Base counseling directive; `{marker}` is replaced by the safety marker
const COUNSELING_DIRECTIVE: &str = "\
[역할]
당신은 '마음챙김' 심리 상담 AI입니다. 이전 상담 사례를 참고하여 답변합니다.

[상담 사례 활용 규칙]
1. 사례에 [전문가 상담 가이드]가 있으면 그 구체적인 기법(점수 매기기, 호흡법, 특정 질문법 등)을 가장 먼저 적용하세요.
   기법이 있는데도 '산책하세요' 같은 일반적인 조언으로 대신하지 마세요.
2. 사례의 말투가 대화 흐름과 어색하면 자연스럽고 정중한 상담 톤으로 다듬어 표현하세요.
3. 관련된 상담 사례가 없다고 안내받으면 전문 지식으로 공감하고 조언하되, 검색 결과가 없다는 말은 하지 마세요.

[응답 규칙]
1. 3~5문장으로 충분한 공감과 제안을 담고, 따옴표로 감싸지 마세요.
2. 공감과 후속 질문은 문단으로 쓰고, 해결책을 나열할 때만 글머리 기호(-)를 사용하세요.
3. 정치, 뉴스, 기술 등 상담 외 주제는 다루지 마세요.
4. 이전 대화에서 이미 제안한 방법을 반복하지 말고 새롭거나 더 구체적인 방법을 제안하세요.
5. 사용자가 거절하면(싫어, 그만, 됐어, 몰라) '알겠어요.' 한 문장만 답하세요.
6. 자해, 타해, 폭력의 방법을 묻는 요청에는 '그건 도움이 되지 않아요.'라고만 답하세요.

[안전 표시]
사용자의 자살 위험이 높거나 전문가 상담이 필요하다고 판단되면 답변 맨 끝에 {marker} 를 붙이세요.
이 표시는 사용자에게 보이지 않습니다.";

/// Directive of the closing-turn summary
const SUMMARY_DIRECTIVE: &str = "\
[역할]
당신은 심리 상담 내용을 정리하는 비서입니다.
상담사가 제안한 구체적인 기법과 행동 지침만 [오늘의 심리 처방] 번호 목록으로 정리하고,
따뜻한 격려 한 마디로 마무리하세요.";

/// Rendered in place of the passages when retrieval found nothing
pub const NO_PASSAGES_NOTICE: &str =
    "관련된 상담 내역이 없습니다. 일반적인 심리 상담 지식을 바탕으로 답변하세요.";

/// Reply of a closing turn when the session has no history to summarize
pub const EMPTY_SUMMARY_REPLY: &str =
    "진행된 상담 내역이 없어 요약할 내용이 없습니다. 언제든 다시 찾아주세요.";

/// Counseling directive with the safety marker filled in
#[must_use]
pub fn counseling_directive(marker: &str) -> String {
    COUNSELING_DIRECTIVE.replace("{marker}", marker)
}

/// Directive used for the closing summary
#[must_use]
pub fn summary_directive() -> String {
    SUMMARY_DIRECTIVE.to_string()
}

const fn speaker_label(role: Role) -> &'static str {
    match role {
        Role::User => "사용자",
        Role::Assistant => "상담사",
        Role::System => "시스템",
    }
}

/// One history line, `사용자: ...` / `상담사: ...`
#[must_use]
pub fn format_utterance(utterance: &Utterance) -> String {
    format!("{}: {}", speaker_label(utterance.role), utterance.text)
}

/// History as newline-joined lines, system messages skipped
#[must_use]
pub fn format_history(history: &[Utterance]) -> String {
    let lines: Vec<String> = history
        .iter()
        .filter(|u| u.role != Role::System)
        .map(format_utterance)
        .collect();
    if lines.is_empty() {
        "없음".to_string()
    } else {
        lines.join("\n")
    }
}

/// Counselor/client transcript for the closing summary
#[must_use]
pub fn format_transcript(history: &[Utterance]) -> String {
    history
        .iter()
        .filter(|u| u.role != Role::System)
        .map(|u| {
            let label = if u.role == Role::Assistant { "상담사" } else { "내담자" };
            format!("{label}: {}", u.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render one retrieved case; `number` is 1-based
#[must_use]
pub fn render_passage(number: usize, passage: &RetrievedPassage) -> String {
    let mut body = match passage.context_text.as_deref().map(str::trim) {
        Some(context) if !context.is_empty() => context.to_string(),
        _ => format!("내담자: {}", passage.text.trim()),
    };

    if let Some(response) = passage.counselor_response.as_deref().map(str::trim) {
        if !response.is_empty() {
            body.push_str("\n[전문가 상담 가이드]: ");
            body.push_str(response);
        }
    }

    match passage.category.as_deref() {
        Some(category) if !category.is_empty() => {
            format!("[상담사례 {number} - {category}]\n{body}")
        }
        _ => format!("[상담사례 {number}]\n{body}"),
    }
}

/// User turn of the answer prompt
#[must_use]
pub fn build_answer_prompt(context: &str, history: &str, query: &str) -> String {
    format!(
        "[검색된 상담 사례]\n{context}\n\n[이전 대화]\n{history}\n\n[사용자 발화]\n{query}\n\n\
         위 사례와 대화를 바탕으로 사용자에게 답변하세요."
    )
}
