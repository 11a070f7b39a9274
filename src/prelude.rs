pub use crate::reg::Registers as _stm32l4xx_clk_reg_Registers;
pub use crate::time::U32Ext as _stm32l4xx_clk_time_U32Ext;
