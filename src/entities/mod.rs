pub mod stock_move;
pub mod stock_quant;
