use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use seq2seq_transformer::{setup_device, Transformer, TransformerConfig};

fn main() -> anyhow::Result<()> {
    let device = setup_device()?;

    let src = Tensor::from_vec(
        vec![1u32, 5, 6, 4, 3, 9, 5, 2, 0, 1, 8, 7, 3, 4, 5, 6, 7, 2],
        (2, 9),
        &device,
    )?;
    let trg = Tensor::from_vec(
        vec![1u32, 7, 4, 3, 5, 9, 2, 0, 1, 5, 6, 2, 4, 7, 6, 2],
        (2, 8),
        &device,
    )?;

    let config = TransformerConfig::new(10, 10, 0, 0);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Transformer::new(config, vb)?;

    // Teacher-forced inference: feed the target shifted by one, dropping
    // its final token.
    let trg_input = trg.narrow(1, 0, trg.dim(1)? - 1)?;
    let logits = model.forward(&src, &trg_input, false)?;

    println!("logits shape: {:?}", logits.dims());
    Ok(())
}
