//! Prompt templates for model calls

use std::collections::HashMap;

/// Template with `{{name}}` placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    variables: Vec<String>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let variables = extract_variables(&template);
        Self {
            template,
            variables,
        }
    }

    /// Fill in the template; unknown placeholders are left as they are
    #[must_use]
    pub fn render(&self, values: &HashMap<&str, &str>) -> String {
        let mut result = self.template.clone();
        for var in &self.variables {
            if let Some(value) = values.get(var.as_str()) {
                result = result.replace(&format!("{{{{{var}}}}}"), value);
            }
        }
        result
    }

    /// Convenience for templates filled from a fixed list of pairs
    #[must_use]
    pub fn render_with(&self, pairs: &[(&str, &str)]) -> String {
        let values: HashMap<&str, &str> = pairs.iter().copied().collect();
        self.render(&values)
    }

    /// Get required variables
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }
}

/// Extract variable names from template
fn extract_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                chars.next();
                if ch == '}' {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                    }
                    break;
                }
                var_name.push(ch);
            }
            if !var_name.is_empty() && !variables.contains(&var_name) {
                variables.push(var_name);
            }
        }
    }

    variables
}

/// Templates for the auxiliary model calls of a counseling turn
pub struct CounselingPrompts;

impl CounselingPrompts {
    /// System prompt of the intent classifier
    pub const INTENT_SYSTEM: &'static str = "\
당신은 심리상담 챗봇의 의도 분류기입니다.
사용자의 발화를 아래 여섯 가지 중 하나로 분류하세요.

[의도 카테고리]
- GREETING: 인사 (안녕, 하이, 반가워, 좋은 아침)
- CHITCHAT: 상담과 무관한 일상 대화, 인물이나 사실의 단순 언급 (날씨, 음식, 영화, 연예인)
- EMOTION: 감정 표현, 고민 토로, 심리적 어려움 (힘들어, 우울해, 불안해)
- QUESTION: 심리나 상담에 관한 정보 질문 (우울증 증상이 뭐야?)
- CRISIS: 자해나 자살 언급, 극단적인 위기 상황
- CLOSING: 상담을 끝내려는 의사 (그만할래, 이제 나갈게, 수고했어)

[규칙]
1. 여섯 개 라벨 중 하나만 출력하세요.
2. 위기 신호가 있으면 무조건 CRISIS입니다.
3. 감정 표현이 있으면 EMOTION입니다.";

    /// User turn of the intent classifier
    #[must_use]
    pub fn intent_classification() -> PromptTemplate {
        PromptTemplate::new(
            "[최근 대화]
{{history}}

사용자 발화: {{query}}

위 발화의 의도를 GREETING, CHITCHAT, EMOTION, QUESTION, CRISIS, CLOSING 중 하나로 답하세요.
의도:",
        )
    }

    /// System prompt of the query rewriter
    pub const REWRITE_SYSTEM: &'static str = "\
너는 검색 증강 상담 챗봇의 질의 재작성기다.
사용자의 마지막 발화를 대화 히스토리를 반영한 검색용 한 문장 쿼리로 바꾼다.

[규칙]
1) 한 줄의 한국어 쿼리만 출력한다.
2) 다섯 글자 이하의 짧은 표현은 그대로 출력한다.
3) 감정 단어(힘들어, 우울해, 불안해, 슬퍼, 외로워, 스트레스)는 보존한다.
4) 단순한 감정 표현에 '대처법', '해결책' 같은 단어를 덧붙이지 않는다.
5) 그거, 아까, 저번 같은 지시어는 히스토리를 근거로 구체화한다.
6) 히스토리에 없는 사실을 만들어내지 않는다.";

    /// User turn of the query rewriter
    #[must_use]
    pub fn query_rewrite() -> PromptTemplate {
        PromptTemplate::new(
            "[대화 히스토리]
{{history}}

[사용자 마지막 발화]
{{query}}

규칙에 따라 검색용 단일 문장 쿼리로 재작성해라.",
        )
    }

    /// Closing-turn summary of the advice given during a session
    #[must_use]
    pub fn session_summary() -> PromptTemplate {
        PromptTemplate::new(
            "[역할]
당신은 심리 상담 내용을 정리하는 비서입니다.
아래 대화 기록에서 상담사가 내담자에게 제안한 안정화 기법과 실천 가능한 조언을 정리하세요.

[대화 기록]
{{conversation}}

[요약 규칙]
1. 호흡법, 점수 매기기처럼 구체적인 기법과 행동 지침만 추출합니다.
2. '공감해 주었다' 같은 내용은 적지 않습니다.
3. [오늘의 심리 처방] 형식의 번호 목록으로 정리합니다.
4. 따뜻한 격려 한 마디로 마무리합니다.",
        )
    }
}
