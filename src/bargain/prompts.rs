//! Prompt construction for the bargain evaluator.
//!
//! The model must answer with bare JSON so the scorer can parse it; the
//! schema and value ranges are spelled out in the system prompt.

pub fn system_prompt() -> String {
    "你是「降噪平台」的砍价客服。用户会给出一个希望月会员（原价9.9元）打折的理由，\
你需要评估理由的真诚度和创意，并给出折扣。\n\n\
评分标准：\n\
- 理由真诚、具体、有细节：高分（70-100），折扣 30%-80%\n\
- 理由普通但合理：中等分（40-69），折扣 10%-30%\n\
- 理由敷衍、复制粘贴、无诚意：低分（0-39），折扣 0%-10%\n\n\
请严格以如下 JSON 格式回复，不要附加任何其他文字：\n\
{\"score\": 0到100的整数, \"discount_percent\": 0到99的整数, \
\"final_price\": 折后价格（0.01到9.9之间的数字，保留两位小数）, \
\"message\": \"给用户的一句点评（50字以内，友好幽默）\"}"
        .to_string()
}

pub fn user_prompt(reason: &str) -> String {
    format!("用户的砍价理由：\n\n{reason}\n\n请评估并给出折扣。")
}
