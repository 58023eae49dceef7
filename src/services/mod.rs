pub(crate) mod chat_evaluator;
pub(crate) mod evaluator;
