//! Prompt templates for the built-in capabilities and the direct path.
//!
//! The wording here is tutor persona, not contract: callers only rely on
//! the placeholder names. Templates use `{placeholder}` substitution.

use crate::conversation::{Message, Role};

/// Router instructions handed to `decide` together with the capability
/// descriptors. The reluctance wording for topic-list and quiz is the whole
/// eagerness policy; there is no structural throttle.
pub const ROUTER: &str = "你是英語學習助手的路由器。你唯一的任務是判斷是否需要使用提供的工具回答用戶的問題。\
需要工具時呼叫適當的工具；不需要時（一般英語學習建議或與英語無關的問題）直接回覆 DIRECT_RESPONSE。\
注意：不要輕易使用列出主題單字與產生測驗的工具，確定真的必要時才使用。\
不要直接回答用戶的問題。";

/// Sentinel the router model emits when no capability is needed.
pub const DIRECT_SENTINEL: &str = "DIRECT_RESPONSE";

const WORD_CARD: &str = "你是一位專業的英語教師，請使用繁體中文說明這個單字，格式如下：\n\
---\n單字：[英文單字]\n詞性：[詞性]\n定義：[繁體中文定義]\n例句：\n\
-> [英文例句]（中文翻譯）\n-> [英文例句]（中文翻譯）\n\
相關詞彙：[相關英文詞彙及簡短解釋]\n使用建議：[繁體中文說明]\n---\n\n查詢單字: {word}";

const CATEGORY_LIST: &str = "根據檢索到的資料，隨機列出 10 個「{category}」主題的單字或片語，\
使用繁體中文解釋，每項包含定義、詞性、使用建議與英文例句（附翻譯）。\n\n檢索到的資料：\n{context}";

const CATEGORY_FALLBACK: &str = "目前無法使用詞彙庫檢索。請依你的一般知識，列出 10 個「{category}」\
主題常見的英文單字或片語，使用繁體中文解釋，每項包含定義、詞性、使用建議與英文例句（附翻譯）。";

const QUIZ: &str = "你是一位專業的英語教師。請根據以下單字資料，從選擇題、填空題、配對題中\
選擇一種題型出 5 題測驗，並在最後附上完整的答案與繁體中文解釋，使用 markdown 排版。\n\n\
單字資料：\n{context}";

const QUIZ_FALLBACK: &str = "你是一位專業的英語教師。目前無法使用詞彙庫檢索，請依你的一般知識，\
針對「{category}」主題，從選擇題、填空題、配對題中選擇一種題型出 5 題英文單字測驗，\
並在最後附上完整的答案與繁體中文解釋，使用 markdown 排版。";

const GENERAL: &str = "你是一個友善的英語學習助手，請使用繁體中文回應。\
如果用戶的問題與英語學習無關，請友善地引導他們詢問英語相關的問題（查詢單字、瀏覽主題詞彙、主題測驗）。\
如果與英語學習有關，直接回答即可，語氣友善且鼓勵。";

/// Appended to capability output produced without retrieval support.
pub const LOW_CONFIDENCE_NOTE: &str =
    "\n\n（註：目前無法使用詞彙庫檢索，以上內容由一般知識產生，僅供參考。）";

/// Generic user-visible failure text for a turn that could not produce a
/// response at all.
pub const TURN_FAILURE: &str = "抱歉，我暫時無法處理這個請求，請稍後再試一次。";

pub fn word_card(word: &str) -> String {
    WORD_CARD.replace("{word}", word)
}

pub fn category_list(category: &str, context: &str) -> String {
    CATEGORY_LIST.replace("{category}", category).replace("{context}", context)
}

pub fn category_fallback(category: &str) -> String {
    CATEGORY_FALLBACK.replace("{category}", category)
}

pub fn quiz(context: &str) -> String {
    QUIZ.replace("{context}", context)
}

pub fn quiz_fallback(category: &str) -> String {
    QUIZ_FALLBACK.replace("{category}", category)
}

/// Builds the single prompt for the DIRECT path: tutor persona, the prior
/// history, and the latest question.
pub fn direct_prompt(messages: &[Message]) -> String {
    let mut prompt = String::from(GENERAL);

    let (latest, earlier) = match messages.split_last() {
        Some((last, rest)) => (Some(last), rest),
        None => (None, messages),
    };

    if !earlier.is_empty() {
        prompt.push_str("\n\n=== 聊天歷史 ===\n");
        for msg in earlier {
            let speaker = match msg.role {
                Role::User => "用戶",
                Role::Assistant | Role::Tool => "助手",
            };
            prompt.push_str(&format!("{speaker}: {}\n", msg.content));
        }
    }

    if let Some(latest) = latest {
        prompt.push_str("\n=== 最新問題 ===\n");
        prompt.push_str(&latest.content);
    }

    prompt
}
